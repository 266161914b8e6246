//! Free-text intent boundary.
//!
//! An [`Interpreter`] turns an operator's question into evidence plus an
//! optional category hint. Its output is untrusted: it only narrows matching,
//! and every command it could lead to still goes through the safety classifier.

use serde::{Deserialize, Serialize};
use warden_shared::Category;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category_hint: Option<Category>,
    pub evidence: String,
}

pub trait Interpreter: Send + Sync {
    fn interpret(&self, text: &str) -> Intent;
}

/// Category vocabulary used by [`KeywordInterpreter`]
const VOCABULARY: &[(Category, &[&str])] = &[
    (
        Category::Kubernetes,
        &[
            "kubectl", "kubelet", "kubernetes", "k8s", "pod", "deployment", "daemonset",
            "statefulset", "namespace", "crashloopbackoff", "imagepullbackoff", "etcd", "coredns",
            "kube-",
        ],
    ),
    (
        Category::Glusterfs,
        &["gluster", "glusterd", "glusterfs", "brick", "heal", "split-brain", "peer", "volume"],
    ),
    (
        Category::UbuntuOs,
        &[
            "ubuntu", "apt", "dpkg", "systemd", "systemctl", "journalctl", "disk", "memory",
            "oom", "swap", "cpu", "load average", "filesystem", "kernel", "ssh",
        ],
    ),
];

/// Vocabulary-count interpreter. Passes the text through untouched and hints
/// the category with the most term hits; ties or no hits give no hint.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordInterpreter;

impl Interpreter for KeywordInterpreter {
    fn interpret(&self, text: &str) -> Intent {
        let lowered = text.to_lowercase();
        let mut scores: Vec<(Category, usize)> = VOCABULARY
            .iter()
            .map(|(category, terms)| {
                let hits = terms.iter().filter(|t| lowered.contains(*t)).count();
                (*category, hits)
            })
            .filter(|(_, hits)| *hits > 0)
            .collect();
        scores.sort_by(|a, b| b.1.cmp(&a.1));

        let category_hint = match scores.as_slice() {
            [(_, n), (_, m), ..] if n == m => None,
            [(best, _), ..] => Some(*best),
            [] => None,
        };

        Intent {
            category_hint,
            evidence: text.trim().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubernetes_hint() {
        let intent = KeywordInterpreter.interpret("my pod is stuck in CrashLoopBackOff");
        assert_eq!(intent.category_hint, Some(Category::Kubernetes));
        assert_eq!(intent.evidence, "my pod is stuck in CrashLoopBackOff");
    }

    #[test]
    fn test_gluster_hint() {
        let intent = KeywordInterpreter.interpret("gluster heal info shows split-brain entries");
        assert_eq!(intent.category_hint, Some(Category::Glusterfs));
    }

    #[test]
    fn test_no_hint() {
        assert_eq!(KeywordInterpreter.interpret("hello there").category_hint, None);
    }

    #[test]
    fn test_tie_gives_no_hint() {
        // one kubernetes term, one ubuntu term
        assert_eq!(KeywordInterpreter.interpret("kubectl on ubuntu").category_hint, None);
    }
}

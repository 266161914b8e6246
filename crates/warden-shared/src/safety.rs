//! Safety classifier: deterministic risk rating for command strings.
//!
//! Two ordered rule tables. HIGH is checked first and the first hit wins,
//! so a command that also looks like a MEDIUM operation is never downgraded.

use regex::Regex;
use std::sync::LazyLock;

use crate::pattern::RiskRating;

// =============================================================================
// Rule Tables
// =============================================================================

/// Destructive operations (never auto-executed)
static HIGH_RISK_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\brm\s+(-[a-z]*r[a-z]*f[a-z]*|-[a-z]*f[a-z]*r[a-z]*|(-[a-z]+\s+)*(-r|-R|--recursive)\s+(-[a-z]+\s+)*(-f|--force)|(-[a-z]+\s+)*(-f|--force)\s+(-[a-z]+\s+)*(-r|-R|--recursive))\b").unwrap(),
            "recursive force delete",
        ),
        (
            Regex::new(r"(?i)\bdd\s+.*\bof=/dev/").unwrap(),
            "raw write to block device",
        ),
        (
            Regex::new(r"(?i)\bmkfs(\.\w+)?\b|\bmkswap\b|\bwipefs\b").unwrap(),
            "filesystem format",
        ),
        (
            Regex::new(r"(?i)\b(fdisk|sfdisk|parted|gdisk|sgdisk)\b").unwrap(),
            "partition table change",
        ),
        (
            Regex::new(r"(?i)\b(shutdown|reboot|halt|poweroff)\b|\binit\s+[06]\b|\bsystemctl\s+(reboot|poweroff|halt)\b").unwrap(),
            "power state change",
        ),
        (
            Regex::new(r"(?i)\b(kill|killall|pkill)\s+(.*\s)?(-9|-kill|-s\s*kill|--signal[=\s]+kill)\b").unwrap(),
            "forceful process termination",
        ),
        (
            Regex::new(r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:").unwrap(),
            "fork bomb",
        ),
        (
            Regex::new(r"(?i)\bchmod\s+(-R\s+)?[0-7]*777\s+/(\s|$)|\bchmod\s+-R\s+\S+\s+/(\s|$)|\bchown\s+(-R\s+)?\S+\s+/(\s|$)").unwrap(),
            "root permission or ownership change",
        ),
        (
            Regex::new(r"(?i)\b(iptables|ip6tables)\s+(-t\s+\w+\s+)?(-F|--flush|-X)\b|\bnft\s+flush\s+ruleset\b|\bufw\s+(reset|disable)\b").unwrap(),
            "firewall flush",
        ),
        (
            Regex::new(r"(?i)\bip\s+link\s+set\s+\S+\s+down\b|\bifdown\b|\bnmcli\s+networking\s+off\b|\bip\s+(addr|route)\s+flush\b").unwrap(),
            "destructive network reset",
        ),
        (
            Regex::new(r"(?i)\bkubectl\s+delete\s+(ns|namespace|namespaces|node|nodes|pv|pvc|persistentvolume\w*)\b|\bkubectl\s+delete\s+.*--all\b|\bkubeadm\s+reset\b").unwrap(),
            "cluster-level delete",
        ),
        (
            Regex::new(r"(?i)\bgluster\s+volume\s+(delete|stop)\b|\bgluster\s+peer\s+detach\b").unwrap(),
            "gluster volume teardown",
        ),
        (
            Regex::new(r">\s*/dev/(sd|nvme|vd|hd|mapper)").unwrap(),
            "redirect onto block device",
        ),
    ]
});

/// Operations that change state and need an operator's eye
static MEDIUM_RISK_RULES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    vec![
        (
            Regex::new(r"(?i)\brm\s+.*(\.log\b|/var/log\b|\*)").unwrap(),
            "broad log deletion",
        ),
        (
            Regex::new(r"(?i)\bfind\s+.*(-delete\b|-exec\s+rm\b)").unwrap(),
            "bulk file deletion",
        ),
        (
            Regex::new(r"(?i)\b(rm|rmdir|shred|unlink)\s").unwrap(),
            "file deletion",
        ),
        (
            Regex::new(r"(?i)\bjournalctl\s+.*--vacuum-(size|time|files)").unwrap(),
            "journal vacuum",
        ),
        (
            Regex::new(r"(?i)\btruncate\s+-s\s*0\b|>\s*/var/log/").unwrap(),
            "log truncation",
        ),
        (
            Regex::new(r"(?i)\bsystemctl\s+(restart|stop|disable|mask|kill|daemon-reload)\b|\bservice\s+\S+\s+(restart|stop)\b").unwrap(),
            "service restart",
        ),
        (
            Regex::new(r"(?i)\bkubectl\s+(rollout\s+restart|delete|drain|cordon|scale|apply|patch|replace|edit)\b").unwrap(),
            "workload change",
        ),
        (
            Regex::new(r"(?i)\bdocker\s+(restart|stop|rm|system\s+prune)\b|\bcrictl\s+(rm|stop)\b").unwrap(),
            "container restart",
        ),
        (
            Regex::new(r"(?i)\b(apt|apt-get|dpkg|snap)\s+(install|remove|purge|upgrade|dist-upgrade|autoremove|--configure)\b").unwrap(),
            "package change",
        ),
        (
            Regex::new(r"(?i)\bgluster\s+volume\s+(heal|start|set|reset|rebalance|replace-brick)\b").unwrap(),
            "gluster volume change",
        ),
        (
            Regex::new(r"(?i)\b(umount|swapoff)\b|\bmount\s+.*-o\s+\S*remount").unwrap(),
            "mount change",
        ),
        (
            Regex::new(r"(?i)\b(kill|pkill|killall)\b").unwrap(),
            "process termination",
        ),
        (
            Regex::new(r"(?i)\bsysctl\s+-w\b|\bchmod\b|\bchown\b").unwrap(),
            "permission or kernel tunable change",
        ),
    ]
});

// =============================================================================
// Classification
// =============================================================================

/// Rating plus the rule that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RiskAssessment {
    pub rating: RiskRating,
    pub rule: Option<&'static str>,
}

/// Rate a single command.
pub fn classify(command: &str) -> RiskRating {
    assess(command).rating
}

/// Rate a single command and report which rule fired.
pub fn assess(command: &str) -> RiskAssessment {
    let command = command.trim();

    for (pattern, label) in HIGH_RISK_RULES.iter() {
        if pattern.is_match(command) {
            return RiskAssessment {
                rating: RiskRating::High,
                rule: Some(label),
            };
        }
    }

    for (pattern, label) in MEDIUM_RISK_RULES.iter() {
        if pattern.is_match(command) {
            return RiskAssessment {
                rating: RiskRating::Medium,
                rule: Some(label),
            };
        }
    }

    RiskAssessment {
        rating: RiskRating::Safe,
        rule: None,
    }
}

/// Highest rating across a set of commands (SAFE when empty).
pub fn classify_all<'a>(commands: impl IntoIterator<Item = &'a str>) -> RiskRating {
    commands
        .into_iter()
        .map(classify)
        .max()
        .unwrap_or(RiskRating::Safe)
}

/// Operator guidance for a rating
pub fn describe_risk(rating: RiskRating) -> &'static str {
    match rating {
        RiskRating::Safe => "Read-only or trivially reversible. Runs automatically.",
        RiskRating::Medium => {
            "Changes system state. Review the command and have a rollback plan before approving."
        }
        RiskRating::High => {
            "Destructive or disruptive. Requires explicit administrator approval; test outside production first."
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_commands_are_safe() {
        for cmd in [
            "df -h",
            "kubectl get pods -A",
            "journalctl -u kubelet --since '1 hour ago'",
            "gluster volume status",
            "systemctl status nginx",
            "free -m",
        ] {
            assert_eq!(classify(cmd), RiskRating::Safe, "{}", cmd);
        }
    }

    #[test]
    fn test_recursive_force_delete_is_high() {
        assert_eq!(classify("rm -rf /var/log"), RiskRating::High);
        assert_eq!(classify("rm -fr /tmp/cache"), RiskRating::High);
        assert_eq!(classify("sudo rm -r -f /srv/data"), RiskRating::High);
        assert_eq!(classify("rm --recursive --force /opt"), RiskRating::High);
    }

    #[test]
    fn test_high_wins_over_medium() {
        // Also a log deletion and a service restart
        let cmd = "systemctl restart rsyslog && rm -rf /var/log/*.log";
        let a = assess(cmd);
        assert_eq!(a.rating, RiskRating::High);
        assert_eq!(a.rule, Some("recursive force delete"));
    }

    #[test]
    fn test_medium_operations() {
        assert_eq!(classify("systemctl restart kubelet"), RiskRating::Medium);
        assert_eq!(classify("journalctl --vacuum-size=200M"), RiskRating::Medium);
        assert_eq!(classify("rm /var/log/syslog.1"), RiskRating::Medium);
        assert_eq!(classify("kubectl rollout restart deploy/api"), RiskRating::Medium);
        assert_eq!(classify("gluster volume heal gv0"), RiskRating::Medium);
        assert_eq!(classify("apt-get install -f"), RiskRating::Medium);
    }

    #[test]
    fn test_high_operations() {
        assert_eq!(classify("mkfs.ext4 /dev/sdb1"), RiskRating::High);
        assert_eq!(classify("dd if=/dev/zero of=/dev/sda bs=1M"), RiskRating::High);
        assert_eq!(classify("killall -9 java"), RiskRating::High);
        assert_eq!(classify("kill -9 1234"), RiskRating::High);
        assert_eq!(classify("iptables -F"), RiskRating::High);
        assert_eq!(classify("kubectl delete namespace prod"), RiskRating::High);
        assert_eq!(classify("gluster volume delete gv0"), RiskRating::High);
        assert_eq!(classify("reboot"), RiskRating::High);
    }

    #[test]
    fn test_plain_kill_is_medium() {
        assert_eq!(classify("kill 1234"), RiskRating::Medium);
        assert_eq!(classify("rm -f /tmp/kubelet.lock"), RiskRating::Medium);
    }

    #[test]
    fn test_classify_all() {
        assert_eq!(classify_all(Vec::<&str>::new()), RiskRating::Safe);
        assert_eq!(
            classify_all(["df -h", "systemctl restart docker"]),
            RiskRating::Medium
        );
    }
}

//! Matcher and catalog behavior over realistic catalogs.

use warden_shared::catalog::{Catalog, CatalogHandle, CatalogSource};
use warden_shared::matcher::{MatchWeights, Matcher};
use warden_shared::Category;

fn yaml(text: &str) -> Catalog {
    Catalog::load(&CatalogSource::Yaml(text.to_string())).unwrap()
}

const MIXED: &str = r#"
patterns:
  - id: disk_full
    category: ubuntu_os
    keywords: [disk, full]
    safety_level: SAFE
    confidence_threshold: 0.5
  - id: enospc
    category: ubuntu_os
    keywords: [space]
    regex_patterns: ['no space left on device']
    safety_level: MEDIUM
    confidence_threshold: 0.5
  - id: crashloop
    category: kubernetes
    regex_patterns: ['(?P<pod>[a-z0-9-]+)\s+\d+/\d+\s+CrashLoopBackOff', 'Back-off restarting']
    remediation: ['kubectl describe pod {pod}']
    safety_level: SAFE
    confidence_threshold: 0.5
  - id: strict
    category: kubernetes
    keywords: [pod, node, kubelet, etcd]
    safety_level: SAFE
    confidence_threshold: 0.9
"#;

#[test]
fn test_single_pattern_disk_full() {
    let catalog = yaml(
        r#"
patterns:
  - id: disk_full
    category: ubuntu_os
    keywords: [disk, full]
    safety_level: SAFE
    confidence_threshold: 0.5
"#,
    );
    let results = Matcher::default().match_evidence(&catalog, "disk is full", None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].pattern_id, "disk_full");
    assert!(results[0].confidence >= 0.5);
    assert_eq!(results[0].excerpt, "disk is full");
}

#[test]
fn test_below_threshold_never_returned() {
    let catalog = yaml(MIXED);
    let matcher = Matcher::default();
    let evidences = [
        "pod restarted on node",
        "disk usage warning",
        "kubelet etcd pod node all unhappy",
        "api-1 0/1 CrashLoopBackOff",
        "nothing relevant",
    ];

    for evidence in evidences {
        for result in matcher.match_evidence(&catalog, evidence, None) {
            let threshold = catalog.get(&result.pattern_id).unwrap().confidence_threshold;
            assert!(
                result.confidence >= threshold,
                "{} scored {} below {}",
                result.pattern_id,
                result.confidence,
                threshold
            );
        }
    }

    // 2 of 4 keywords = 0.5 < 0.9
    let results = matcher.match_evidence(&catalog, "pod restarted on node", None);
    assert!(results.iter().all(|r| r.pattern_id != "strict"));
}

#[test]
fn test_results_ranked_and_ties_keep_declaration_order() {
    let catalog = yaml(
        r#"
patterns:
  - {id: first, category: ubuntu_os, keywords: [timeout, refused], safety_level: SAFE, confidence_threshold: 0.1}
  - {id: second, category: ubuntu_os, keywords: [timeout, refused], safety_level: SAFE, confidence_threshold: 0.1}
  - {id: best, category: ubuntu_os, keywords: [timeout], regex_patterns: ['connection timeout'], safety_level: SAFE, confidence_threshold: 0.1}
"#,
    );
    let results = Matcher::default().match_evidence(&catalog, "connection timeout to 10.0.0.1", None);
    let ids: Vec<&str> = results.iter().map(|r| r.pattern_id.as_str()).collect();
    assert_eq!(ids, vec!["best", "first", "second"]);
}

#[test]
fn test_category_hint_filters() {
    let catalog = yaml(MIXED);
    let evidence = "disk full and api-1 0/1 CrashLoopBackOff";
    let all = Matcher::default().match_evidence(&catalog, evidence, None);
    assert!(all.iter().any(|r| r.category == Category::UbuntuOs));

    let k8s = Matcher::default().match_evidence(&catalog, evidence, Some(Category::Kubernetes));
    assert!(!k8s.is_empty());
    assert!(k8s.iter().all(|r| r.category == Category::Kubernetes));
}

#[test]
fn test_named_captures_and_excerpt_line() {
    let catalog = yaml(MIXED);
    let evidence = "NAME READY STATUS\napi-7d9f 0/1 CrashLoopBackOff\nweb-1 1/1 Running";
    let results = Matcher::default().match_evidence(&catalog, evidence, Some(Category::Kubernetes));
    let crash = results.iter().find(|r| r.pattern_id == "crashloop").unwrap();
    assert_eq!(crash.captures.get("pod").map(String::as_str), Some("api-7d9f"));
    assert_eq!(crash.excerpt, "api-7d9f 0/1 CrashLoopBackOff");
    // one of two regexes
    assert!((crash.confidence - 0.5).abs() < 1e-9);
}

#[test]
fn test_weights_are_configurable() {
    let catalog = yaml(MIXED);
    // keyword hit, no regex hit
    let evidence = "space exhausted on /var";
    let regex_heavy = Matcher::new(MatchWeights { keyword: 0.0, regex: 1.0 }, 120);
    let keyword_heavy = Matcher::new(MatchWeights { keyword: 1.0, regex: 0.0 }, 120);

    let r = regex_heavy.match_evidence(&catalog, evidence, None);
    let k = keyword_heavy.match_evidence(&catalog, evidence, None);
    let score = |v: &[warden_shared::MatchResult]| {
        v.iter().find(|m| m.pattern_id == "enospc").map(|m| m.confidence)
    };
    assert_eq!(score(&r), None);
    assert_eq!(score(&k), Some(1.0));
}

#[test]
fn test_no_match_is_empty() {
    let catalog = yaml(MIXED);
    assert!(Matcher::default()
        .match_evidence(&catalog, "all systems nominal", None)
        .is_empty());
}

#[test]
fn test_reload_unchanged_source_is_idempotent() {
    let source = CatalogSource::Yaml(MIXED.to_string());
    let handle = CatalogHandle::load(&source).unwrap();

    let ids = |h: &CatalogHandle, c: Category| -> Vec<String> {
        h.lookup(c).iter().map(|p| p.id.clone()).collect()
    };
    let before: Vec<Vec<String>> = Category::ALL.iter().map(|c| ids(&handle, *c)).collect();

    handle.reload(&source).unwrap();
    handle.reload(&source).unwrap();
    let after: Vec<Vec<String>> = Category::ALL.iter().map(|c| ids(&handle, *c)).collect();

    assert_eq!(before, after);
    assert_eq!(after[1], vec!["crashloop".to_string(), "strict".to_string()]);
}

#[test]
fn test_reader_keeps_old_catalog_across_reload() {
    let handle = CatalogHandle::load(&CatalogSource::Yaml(MIXED.to_string())).unwrap();
    let held = handle.current();

    let smaller = r#"
patterns:
  - {id: only, category: glusterfs, keywords: [brick], safety_level: SAFE, confidence_threshold: 0.5}
"#;
    handle.reload(&CatalogSource::Yaml(smaller.to_string())).unwrap();

    assert_eq!(held.len(), 4);
    assert_eq!(handle.current().len(), 1);
}

#[test]
fn test_catalog_file_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let json_path = dir.path().join("patterns.json");
    std::fs::write(
        &json_path,
        r#"{"patterns":[{"id":"heal","category":"glusterfs","keywords":["heal"],"safety_level":"MEDIUM","confidence_threshold":0.2}]}"#,
    )
    .unwrap();
    let yaml_path = dir.path().join("patterns.yaml");
    std::fs::write(&yaml_path, MIXED).unwrap();

    assert_eq!(Catalog::load(&CatalogSource::file(&json_path)).unwrap().len(), 1);
    assert_eq!(Catalog::load(&CatalogSource::file(&yaml_path)).unwrap().len(), 4);
    assert!(Catalog::load(&CatalogSource::file(dir.path().join("missing.yaml"))).is_err());
}

#[test]
fn test_partial_catalog_never_installed() {
    let handle = CatalogHandle::load(&CatalogSource::Yaml(MIXED.to_string())).unwrap();
    let half_bad = r#"
patterns:
  - {id: good, category: ubuntu_os, keywords: [x], safety_level: SAFE, confidence_threshold: 0.5}
  - {id: bad, category: ubuntu_os, regex_patterns: ['(oops'], safety_level: SAFE, confidence_threshold: 0.5}
"#;
    assert!(handle.reload(&CatalogSource::Yaml(half_bad.to_string())).is_err());
    assert!(handle.current().get("good").is_none());
    assert_eq!(handle.current().len(), 4);
}

#[test]
fn test_case_variant_keywords_count_once() {
    let catalog = yaml(
        r#"
patterns:
  - {id: disk_full, category: ubuntu_os, keywords: [disk, Disk], safety_level: SAFE, confidence_threshold: 0.9}
"#,
    );
    let results = Matcher::default().match_evidence(&catalog, "DISK pressure", None);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].confidence, 1.0);
    assert_eq!(results[0].matched_keywords, vec!["disk".to_string()]);
}

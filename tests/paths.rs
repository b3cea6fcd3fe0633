use q2::paths::{clean, matching_root, normalize, within_root};

#[test]
fn normalize_is_idempotent() {
    let samples = [
        "/photos",
        "/photos/",
        "  /photos/2024  ",
        "\"/photos/quoted\"",
        "'/photos/single'",
        "/a//b/./c/../d",
        "relative/path",
        "a/../../b",
        ".",
    ];
    for sample in samples {
        let once = normalize(sample);
        assert_eq!(normalize(&once), once, "normalize not idempotent for {sample:?}");
    }
}

#[test]
fn clean_strips_quotes_and_whitespace() {
    assert_eq!(clean("  /photos  ").as_deref(), Some("/photos"));
    assert_eq!(clean("\"/photos\"").as_deref(), Some("/photos"));
    assert_eq!(clean("'/photos'").as_deref(), Some("/photos"));
    assert_eq!(clean(""), None);
    assert_eq!(clean("   "), None);
}

#[test]
fn clean_resolves_dot_segments_lexically() {
    assert_eq!(clean("/a//b/./c").as_deref(), Some("/a/b/c"));
    assert_eq!(clean("/a/b/../c").as_deref(), Some("/a/c"));
    assert_eq!(clean("/a/../..").as_deref(), Some("/"));
}

#[test]
fn within_root_accepts_the_root_itself_and_children() {
    assert!(within_root("/photos", "/photos"));
    assert!(within_root("/photos/", "/photos"));
    assert!(within_root("/photos/2024/img.jpg", "/photos"));
}

#[test]
fn within_root_rejects_sibling_prefixes() {
    assert!(!within_root("/photos2", "/photos"));
    assert!(!within_root("/photos2/img.jpg", "/photos"));
    assert!(!within_root("/pho", "/photos"));
}

#[test]
fn within_root_rejects_escapes_via_parent_segments() {
    assert!(!within_root("/photos/../etc/passwd", "/photos"));
}

#[test]
fn matching_root_prefers_any_containing_root() {
    let roots = vec!["/music".to_string(), "/photos".to_string()];
    assert_eq!(matching_root("/photos/a.jpg", &roots), Some("/photos"));
    assert_eq!(matching_root("/video/a.mp4", &roots), None);
}

#[cfg(windows)]
#[test]
fn normalize_lowercases_on_case_insensitive_hosts() {
    assert_eq!(normalize("C:\\Photos\\IMG.JPG"), normalize("c:\\photos\\img.jpg"));
}

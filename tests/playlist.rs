use q2::playlist::{
    emit_m3u, parse_m3u, sanitize_name, PlaylistError, PlaylistStore, Song,
};

fn song(path: &str, title: &str, duration: i64) -> Song {
    Song {
        path: path.to_owned(),
        title: title.to_owned(),
        duration,
    }
}

#[test]
fn emit_then_parse_round_trips() {
    let songs = vec![
        song("/music/a.mp3", "Track A", 215),
        song("/music/b.flac", "Track B, with comma", 0),
        song("/music/sub dir/c.ogg", "c.ogg", 3600),
    ];
    assert_eq!(parse_m3u(&emit_m3u(&songs)), songs);
}

#[test]
fn parse_defaults_title_to_basename_and_skips_noise() {
    let text = "#EXTM3U\n\n# a comment\n/music/a.mp3\n#EXTINF:42,Named\n/music/b.mp3\n";
    let songs = parse_m3u(text);
    assert_eq!(songs.len(), 2);
    assert_eq!(songs[0].title, "a.mp3");
    assert_eq!(songs[0].duration, 0);
    assert_eq!(songs[1].title, "Named");
    assert_eq!(songs[1].duration, 42);
}

#[test]
fn extinf_state_does_not_leak_across_tracks() {
    let text = "#EXTM3U\n#EXTINF:42,Named\n/a.mp3\n/b.mp3\n";
    let songs = parse_m3u(text);
    assert_eq!(songs[0].duration, 42);
    assert_eq!(songs[1].title, "b.mp3");
    assert_eq!(songs[1].duration, 0);
}

#[test]
fn sanitize_replaces_hostile_characters() {
    assert_eq!(sanitize_name("My <Best> Mix?"), "My _Best_ Mix_");
    assert_eq!(sanitize_name("a/b\\c:d"), "a_b_c_d");
    assert_eq!(sanitize_name("  trailing.dots..  "), "trailing.dots");
    assert_eq!(sanitize_name("***"), "___");
    assert_eq!(sanitize_name(""), "Untitled");
    assert_eq!(sanitize_name(" . "), "Untitled");
}

#[test]
fn create_refuses_duplicates() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());

    let (name, path) = store.create("Road Trip").expect("create");
    assert_eq!(name, "Road Trip");
    assert!(path.exists());

    assert!(matches!(
        store.create("Road Trip"),
        Err(PlaylistError::AlreadyExists)
    ));
}

#[test]
fn add_dedupes_by_normalized_path() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, path) = store.create("mix").expect("create");
    let playlist = path.to_string_lossy().into_owned();

    let first = store.add(&playlist, "/music/a.mp3", Some("A"), 120).expect("add");
    assert!(!first);
    // Same file through a messier spelling of the path.
    let second = store.add(&playlist, "/music//./a.mp3", None, 0).expect("add");
    assert!(second);

    let (_, songs) = store.read(&playlist).expect("read");
    assert_eq!(songs.len(), 1);
    assert_eq!(songs[0].title, "A");
}

#[test]
fn add_defaults_title_and_duration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, path) = store.create("mix").expect("create");
    let playlist = path.to_string_lossy().into_owned();

    store.add(&playlist, "/music/tune.mp3", None, 0).expect("add");
    let (_, songs) = store.read(&playlist).expect("read");
    assert_eq!(songs[0].title, "tune.mp3");
    assert_eq!(songs[0].duration, 0);
}

#[test]
fn remove_is_bounds_checked() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, path) = store.create("mix").expect("create");
    let playlist = path.to_string_lossy().into_owned();
    store.add(&playlist, "/music/a.mp3", None, 0).expect("add");

    assert!(matches!(
        store.remove(&playlist, 5),
        Err(PlaylistError::InvalidIndex)
    ));
    store.remove(&playlist, 0).expect("remove");
    let (_, songs) = store.read(&playlist).expect("read");
    assert!(songs.is_empty());
}

#[test]
fn reorder_moves_before_the_original_target() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, path) = store.create("mix").expect("create");
    let playlist = path.to_string_lossy().into_owned();
    for p in ["/m/a.mp3", "/m/b.mp3", "/m/c.mp3"] {
        store.add(&playlist, p, None, 0).expect("add");
    }

    // Moving forward: the removal shifts the target left by one.
    store.reorder(&playlist, 0, 2).expect("reorder");
    let (_, songs) = store.read(&playlist).expect("read");
    let order: Vec<&str> = songs.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(order, vec!["/m/b.mp3", "/m/a.mp3", "/m/c.mp3"]);

    // Moving backward lands exactly on the target.
    store.reorder(&playlist, 2, 0).expect("reorder");
    let (_, songs) = store.read(&playlist).expect("read");
    let order: Vec<&str> = songs.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(order, vec!["/m/c.mp3", "/m/b.mp3", "/m/a.mp3"]);
}

#[test]
fn check_reports_membership_across_playlists() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, with) = store.create("with").expect("create");
    store.create("without").expect("create");
    store
        .add(&with.to_string_lossy(), "/m/a.mp3", None, 0)
        .expect("add");

    let memberships = store.check("/m/a.mp3").expect("check");
    assert_eq!(memberships.len(), 2);
    let by_name: std::collections::HashMap<_, _> = memberships
        .iter()
        .map(|m| (m.name.as_str(), m.contains))
        .collect();
    assert!(by_name["with"]);
    assert!(!by_name["without"]);
}

#[test]
fn operations_outside_the_playlist_dir_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());

    assert!(matches!(
        store.read("/etc/passwd"),
        Err(PlaylistError::OutsideDirectory)
    ));
    assert!(matches!(
        store.delete("/etc/passwd"),
        Err(PlaylistError::OutsideDirectory)
    ));
    assert!(matches!(
        store.add("/tmp/other.m3u8", "/m/a.mp3", None, 0),
        Err(PlaylistError::OutsideDirectory)
    ));
}

#[test]
fn list_counts_entries() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = PlaylistStore::new(dir.path());
    let (_, path) = store.create("mix").expect("create");
    let playlist = path.to_string_lossy().into_owned();
    store.add(&playlist, "/m/a.mp3", None, 0).expect("add");
    store.add(&playlist, "/m/b.mp3", None, 0).expect("add");

    let lists = store.list().expect("list");
    assert_eq!(lists.len(), 1);
    assert_eq!(lists[0].name, "mix");
    assert_eq!(lists[0].count, 2);
}

// Edge-case tests spanning the store, the reconciler, and person identity.
// Run with: cargo test --lib store::tests

mod reconcile_tests {
    use crate::config::AnalyzerConfig;
    use crate::error::ReconcileError;
    use crate::feed::{CategoryPair, NormalizedEpisode, NormalizedFeed, PersonMention, PersonRole};
    use crate::ingest::{reconcile_feed, verify_enclosure};
    use crate::store::{Database, EpisodeChange, ReleaseFrequency};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn days_ago(days: i64) -> DateTime<Utc> {
        now() - Duration::days(days)
    }

    fn episode(guid: Option<&str>, url: &str, title: &str) -> NormalizedEpisode {
        NormalizedEpisode {
            guid: guid.map(str::to_string),
            title: Some(title.to_string()),
            show_notes: None,
            episode_url: None,
            release_at: None,
            duration_seconds: Some(1800),
            episode_number: None,
            season_number: None,
            episode_type: "full".to_string(),
            explicit: false,
            enclosure_url: url.to_string(),
            mime_type: Some("audio/mpeg".to_string()),
            file_size: Some(1024),
            transcript_detected: false,
            cw_present: false,
            people: Vec::new(),
        }
    }

    fn feed(title: &str, episodes: Vec<NormalizedEpisode>) -> NormalizedFeed {
        NormalizedFeed {
            title: title.to_string(),
            description: Some("A test feed".to_string()),
            author: None,
            email: None,
            site_url: None,
            language: Some("en".to_string()),
            generator: None,
            explicit: false,
            itunes_feed_type: None,
            funding_url: None,
            cover_art_url: None,
            keywords: Vec::new(),
            has_itunes_data: true,
            has_podcast_index_data: false,
            categories: Vec::new(),
            episodes,
            skipped_items: 0,
        }
    }

    // =========================================================================
    // Idempotence and change counting
    // =========================================================================

    #[test]
    fn test_first_reconcile_creates_everything() {
        let (db, _temp) = setup_test_db();
        let parsed = feed(
            "Night Signals",
            vec![
                episode(Some("ns-1"), "https://cdn.example/1.mp3", "One"),
                episode(Some("ns-2"), "https://cdn.example/2.mp3", "Two"),
            ],
        );
        let result = reconcile_feed(
            &db,
            "https://example.com/feed.xml",
            &parsed,
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();

        assert!(result.podcast_created);
        assert_eq!(result.episodes_created, 2);
        assert_eq!(result.episodes_updated, 0);
        assert_eq!(result.episodes_unchanged, 0);
        assert_eq!(db.count_episodes(result.podcast_id).unwrap(), 2);
    }

    #[test]
    fn test_second_reconcile_is_a_noop() {
        let (db, _temp) = setup_test_db();
        let parsed = feed(
            "Night Signals",
            vec![
                episode(Some("ns-1"), "https://cdn.example/1.mp3", "One"),
                episode(Some("ns-2"), "https://cdn.example/2.mp3", "Two"),
            ],
        );
        let config = AnalyzerConfig::default();
        let url = "https://example.com/feed.xml";

        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        let second = reconcile_feed(&db, url, &parsed, &config, now()).unwrap();

        assert!(!second.podcast_created);
        assert!(!second.podcast_metadata_changed);
        assert_eq!(second.episodes_created, 0);
        assert_eq!(second.episodes_updated, 0);
        assert_eq!(second.episodes_unchanged, 2);
        assert_eq!(db.count_episodes(second.podcast_id).unwrap(), 2);
    }

    #[test]
    fn test_second_reconcile_writes_only_the_recheck_timestamp() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/feed.xml";
        let mut parsed = feed(
            "Night Signals",
            vec![episode(Some("ns-1"), "https://cdn.example/1.mp3", "One")],
        );
        parsed.keywords = vec!["history".to_string()];
        parsed.categories = vec![CategoryPair {
            name: "Fiction".to_string(),
            parent: None,
        }];
        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();

        // An identical pass touches exactly one row: last_checked_at. Any
        // other row change means category/tag edges or episodes were
        // rewritten for nothing.
        let before = total_changes(&db);
        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        assert_eq!(total_changes(&db) - before, 1);
    }

    fn total_changes(db: &Database) -> i64 {
        db.conn
            .lock()
            .unwrap()
            .query_row("SELECT total_changes()", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_parallel_reconciles_of_distinct_feeds() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();

        std::thread::scope(|scope| {
            for slug in ["alpha", "beta"] {
                let db = &db;
                let config = &config;
                scope.spawn(move || {
                    let url = format!("https://example.com/{slug}.xml");
                    for i in 0..20 {
                        let parsed = feed(
                            slug,
                            vec![episode(
                                Some(&format!("{slug}-{i}")),
                                &format!("https://cdn.example/{slug}/{i}.mp3"),
                                "Episode",
                            )],
                        );
                        reconcile_feed(db, &url, &parsed, config, now()).unwrap();
                    }
                });
            }
        });

        for slug in ["alpha", "beta"] {
            let podcast = db
                .get_podcast_by_feed_url(&format!("https://example.com/{slug}.xml"))
                .unwrap()
                .unwrap();
            assert_eq!(db.count_episodes(podcast.id).unwrap(), 20);
        }
    }

    #[test]
    fn test_failed_write_scope_rolls_everything_back() {
        let (db, _temp) = setup_test_db();
        let url = "https://example.com/doomed.xml";

        let result: Result<(), ReconcileError> = db.exclusive_write(|store| {
            let (podcast_id, created) = store.get_or_create_podcast(url, "Doomed Show")?;
            assert!(created);
            Err(ReconcileError::PodcastNotFound(podcast_id))
        });

        assert!(result.is_err());
        // The insert above never committed.
        assert!(db.get_podcast_by_feed_url(url).unwrap().is_none());
    }

    #[test]
    fn test_changed_and_new_episodes_counted_separately() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/feed.xml";
        let parsed = feed(
            "Night Signals",
            vec![
                episode(Some("ns-1"), "https://cdn.example/1.mp3", "One"),
                episode(Some("ns-2"), "https://cdn.example/2.mp3", "Two"),
            ],
        );
        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();

        let mut next = parsed.clone();
        next.episodes[0].title = Some("One (remastered)".to_string());
        next.episodes
            .push(episode(Some("ns-3"), "https://cdn.example/3.mp3", "Three"));

        let result = reconcile_feed(&db, url, &next, &config, now()).unwrap();
        assert_eq!(result.episodes_created, 1);
        assert_eq!(result.episodes_updated, 1);
        assert_eq!(result.episodes_unchanged, 1);

        let stored = db
            .find_episode_by_guid(result.podcast_id, "ns-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.title, Some("One (remastered)".to_string()));
    }

    // =========================================================================
    // Identity keys
    // =========================================================================

    #[test]
    fn test_guidless_episode_matched_by_enclosure_url() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/feed.xml";
        let parsed = feed(
            "Night Signals",
            vec![episode(None, "https://cdn.example/1.mp3", "One")],
        );
        let first = reconcile_feed(&db, url, &parsed, &config, now()).unwrap();

        let second = reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        assert_eq!(second.episodes_unchanged, 1);
        assert_eq!(db.count_episodes(first.podcast_id).unwrap(), 1);
    }

    #[test]
    fn test_episode_gains_guid_without_duplicating() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/feed.xml";
        reconcile_feed(
            &db,
            url,
            &feed(
                "Night Signals",
                vec![episode(None, "https://cdn.example/1.mp3", "One")],
            ),
            &config,
            now(),
        )
        .unwrap();

        // The publisher starts emitting guids for existing items. The guid
        // key finds nothing, so the match falls back to the enclosure URL.
        let with_guid = feed(
            "Night Signals",
            vec![episode(Some("ns-1"), "https://cdn.example/1.mp3", "One")],
        );
        let result = reconcile_feed(&db, url, &with_guid, &config, now()).unwrap();
        assert_eq!(result.episodes_updated, 1);
        assert_eq!(db.count_episodes(result.podcast_id).unwrap(), 1);

        let stored = db
            .find_episode_by_guid(result.podcast_id, "ns-1")
            .unwrap()
            .unwrap();
        assert_eq!(stored.guid, Some("ns-1".to_string()));
    }

    #[test]
    fn test_duplicate_identity_aborts_before_any_write() {
        let (db, _temp) = setup_test_db();
        let parsed = feed(
            "Broken Feed",
            vec![
                episode(Some("dup"), "https://cdn.example/1.mp3", "One"),
                episode(Some("dup"), "https://cdn.example/2.mp3", "Two"),
            ],
        );
        let err = reconcile_feed(
            &db,
            "https://example.com/broken.xml",
            &parsed,
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap_err();

        assert!(matches!(err, ReconcileError::DuplicateIdentity { .. }));
        assert!(db
            .get_podcast_by_feed_url("https://example.com/broken.xml")
            .unwrap()
            .is_none());
    }

    // =========================================================================
    // Derived podcast state
    // =========================================================================

    #[test]
    fn test_weekly_cadence_classified_and_not_dormant() {
        let (db, _temp) = setup_test_db();
        let mut episodes = Vec::new();
        for i in 0..6 {
            let mut ep = episode(
                Some(&format!("w-{i}")),
                &format!("https://cdn.example/w{i}.mp3"),
                "Weekly",
            );
            ep.release_at = Some(days_ago(7 * (6 - i)));
            episodes.push(ep);
        }
        let result = reconcile_feed(
            &db,
            "https://example.com/weekly.xml",
            &feed("Weekly Show", episodes),
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();

        assert_eq!(result.release_frequency, ReleaseFrequency::Weekly);
        assert!(!result.dormant);
        assert_eq!(result.last_release_at, Some(days_ago(7)));
    }

    #[test]
    fn test_stale_feed_flagged_dormant() {
        let (db, _temp) = setup_test_db();
        let mut ep = episode(Some("old"), "https://cdn.example/old.mp3", "Old");
        ep.release_at = Some(days_ago(200));
        let result = reconcile_feed(
            &db,
            "https://example.com/stale.xml",
            &feed("Stale Show", vec![ep]),
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();

        assert!(result.dormant);
        let podcast = db.get_podcast(result.podcast_id).unwrap().unwrap();
        assert!(podcast.dormant);
    }

    #[test]
    fn test_undated_feed_is_dormant_with_unknown_frequency() {
        let (db, _temp) = setup_test_db();
        let result = reconcile_feed(
            &db,
            "https://example.com/undated.xml",
            &feed(
                "Undated",
                vec![episode(Some("u-1"), "https://cdn.example/u1.mp3", "One")],
            ),
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();

        assert!(result.dormant);
        assert_eq!(result.release_frequency, ReleaseFrequency::Unknown);
    }

    #[test]
    fn test_seasons_created_only_when_referenced() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/seasons.xml";

        let flat = feed(
            "Flat Show",
            vec![episode(Some("f-1"), "https://cdn.example/f1.mp3", "One")],
        );
        let result = reconcile_feed(&db, url, &flat, &config, now()).unwrap();
        assert_eq!(db.season_count(result.podcast_id).unwrap(), 0);

        let mut seasoned = flat.clone();
        seasoned.episodes[0].season_number = Some(2);
        let result = reconcile_feed(&db, url, &seasoned, &config, now()).unwrap();
        assert_eq!(db.season_count(result.podcast_id).unwrap(), 1);

        let stored = db
            .find_episode_by_guid(result.podcast_id, "f-1")
            .unwrap()
            .unwrap();
        let season = db.get_season(stored.season_id.unwrap()).unwrap().unwrap();
        assert_eq!(season.season_number, 2);
    }

    #[test]
    fn test_metadata_change_detected_but_bare_recheck_is_not() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/meta.xml";
        let parsed = feed(
            "Meta Show",
            vec![episode(Some("m-1"), "https://cdn.example/m1.mp3", "One")],
        );
        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();

        // Only the clock moved; last_checked_at updates but nothing else.
        let later = now() + Duration::hours(6);
        let second = reconcile_feed(&db, url, &parsed, &config, later).unwrap();
        assert!(!second.podcast_metadata_changed);
        let podcast = db.get_podcast(second.podcast_id).unwrap().unwrap();
        assert_eq!(podcast.last_checked_at, Some(later));

        let mut renamed = parsed.clone();
        renamed.description = Some("New description".to_string());
        let third = reconcile_feed(&db, url, &renamed, &config, later).unwrap();
        assert!(third.podcast_metadata_changed);
    }

    #[test]
    fn test_cover_art_url_persisted_and_kept_on_sparse_parse() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/art.xml";
        let mut parsed = feed(
            "Art Show",
            vec![episode(Some("a-1"), "https://cdn.example/a1.mp3", "One")],
        );
        parsed.cover_art_url = Some("https://cdn.example/cover.jpg".to_string());

        let result = reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        let podcast = db.get_podcast(result.podcast_id).unwrap().unwrap();
        assert_eq!(
            podcast.cover_art_url,
            Some("https://cdn.example/cover.jpg".to_string())
        );

        // A later parse without artwork keeps the stored url.
        let mut sparse = parsed.clone();
        sparse.cover_art_url = None;
        reconcile_feed(&db, url, &sparse, &config, now()).unwrap();
        let podcast = db.get_podcast(result.podcast_id).unwrap().unwrap();
        assert_eq!(
            podcast.cover_art_url,
            Some("https://cdn.example/cover.jpg".to_string())
        );
    }

    #[test]
    fn test_feed_host_and_tracking_inferred_from_enclosures() {
        let (db, _temp) = setup_test_db();
        let mut parsed = feed(
            "Hosted Show",
            vec![episode(
                Some("h-1"),
                "https://dts.podtrac.com/redirect.mp3/media.buzzsprout.com/h1.mp3",
                "One",
            )],
        );
        parsed.generator = Some("Some unknown generator".to_string());

        let result = reconcile_feed(
            &db,
            "https://example.com/hosted.xml",
            &parsed,
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();

        let podcast = db.get_podcast(result.podcast_id).unwrap().unwrap();
        assert_eq!(podcast.probable_feed_host, Some("Buzzsprout".to_string()));
        assert!(podcast.has_tracking_data);
    }

    // =========================================================================
    // Categories and tags through reconcile
    // =========================================================================

    #[test]
    fn test_categories_upserted_with_parents() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let mut parsed = feed(
            "Categorized",
            vec![episode(Some("c-1"), "https://cdn.example/c1.mp3", "One")],
        );
        parsed.categories = vec![
            CategoryPair {
                name: "Society & Culture".to_string(),
                parent: None,
            },
            CategoryPair {
                name: "Philosophy".to_string(),
                parent: Some("Society & Culture".to_string()),
            },
        ];

        let url = "https://example.com/cat.xml";
        let result = reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        let stored = db.categories_for_podcast(result.podcast_id).unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored
            .iter()
            .any(|(c, p)| c.name == "Philosophy" && p.as_deref() == Some("Society & Culture")));

        // Same names on a second pass reuse the same rows.
        reconcile_feed(&db, url, &parsed, &config, now()).unwrap();
        assert_eq!(db.category_count().unwrap(), 2);
    }

    #[test]
    fn test_keywords_stored_as_tags() {
        let (db, _temp) = setup_test_db();
        let mut parsed = feed(
            "Tagged",
            vec![episode(Some("t-1"), "https://cdn.example/t1.mp3", "One")],
        );
        parsed.keywords = vec!["history".to_string(), "radio drama".to_string()];

        let result = reconcile_feed(
            &db,
            "https://example.com/tags.xml",
            &parsed,
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();
        let tags = db.tags_for_podcast(result.podcast_id).unwrap();
        assert_eq!(tags, vec!["history".to_string(), "radio drama".to_string()]);
    }

    // =========================================================================
    // People through reconcile
    // =========================================================================

    #[test]
    fn test_people_attached_case_insensitively() {
        let (db, _temp) = setup_test_db();
        let config = AnalyzerConfig::default();
        let url = "https://example.com/people.xml";

        let mut ep1 = episode(Some("p-1"), "https://cdn.example/p1.mp3", "One");
        ep1.people.push(PersonMention {
            name: "Alex Reyes".to_string(),
            role: PersonRole::Host,
            url: None,
            img_url: None,
        });
        let mut ep2 = episode(Some("p-2"), "https://cdn.example/p2.mp3", "Two");
        ep2.people.push(PersonMention {
            name: "alex reyes".to_string(),
            role: PersonRole::Host,
            url: Some("https://alex.example".to_string()),
            img_url: None,
        });

        let result = reconcile_feed(&db, url, &feed("People Show", vec![ep1, ep2]), &config, now())
            .unwrap();
        assert_eq!(result.people_created, 1);
        assert_eq!(result.people_attached, 2);

        let person = db.find_person_by_name("ALEX REYES").unwrap().unwrap();
        assert_eq!(db.hosted_episode_ids(person.id).unwrap().len(), 2);
        // A later mention filled in the url the first one lacked.
        assert_eq!(person.url, Some("https://alex.example".to_string()));
    }

    // =========================================================================
    // Enclosure verification
    // =========================================================================

    #[test]
    fn test_verify_enclosure_corrects_declared_mime_type() {
        let (db, _temp) = setup_test_db();
        let mut ep = episode(Some("v-1"), "https://cdn.example/v1.bin", "One");
        ep.mime_type = Some("audio/mp3".to_string());
        let result = reconcile_feed(
            &db,
            "https://example.com/verify.xml",
            &feed("Verify Show", vec![ep]),
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();
        let stored = &db.episodes_for_podcast(result.podcast_id).unwrap()[0];

        let mut bytes = b"ID3\x03\x00\x00\x00\x00\x00\x21".to_vec();
        bytes.extend(std::iter::repeat(0u8).take(64));
        let verification = verify_enclosure(&db, stored.id, &bytes).unwrap();

        assert!(verification.changed);
        assert_eq!(verification.mime_type, "audio/mpeg");
        assert_eq!(verification.file_name, Some("v1.mp3".to_string()));

        let updated = db.get_episode(stored.id).unwrap().unwrap();
        assert_eq!(updated.mime_type, Some("audio/mpeg".to_string()));
        assert_eq!(updated.file_name, Some("v1.mp3".to_string()));

        // The next feed pass must not undo the sniffed type.
        let again = verify_enclosure(&db, stored.id, &bytes).unwrap();
        assert!(!again.changed);
    }

    #[test]
    fn test_update_episode_fields_applies_only_listed_columns() {
        let (db, _temp) = setup_test_db();
        let result = reconcile_feed(
            &db,
            "https://example.com/fields.xml",
            &feed(
                "Fields",
                vec![episode(Some("f-1"), "https://cdn.example/f1.mp3", "One")],
            ),
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap();
        let stored = &db.episodes_for_podcast(result.podcast_id).unwrap()[0];

        db.update_episode_fields(
            stored.id,
            &[
                EpisodeChange::Title(Some("Renamed".to_string())),
                EpisodeChange::DurationSeconds(Some(3600)),
            ],
        )
        .unwrap();

        let updated = db.get_episode(stored.id).unwrap().unwrap();
        assert_eq!(updated.title, Some("Renamed".to_string()));
        assert_eq!(updated.duration_seconds, Some(3600));
        assert_eq!(updated.download_url, stored.download_url);
        assert_eq!(updated.guid, stored.guid);
    }
}

mod person_merge_tests {
    use crate::error::MergeError;
    use crate::people::{analyze_merge_conflict, merge, resolve_person};
    use crate::store::Database;
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    /// Podcast with `count` bare episodes, returning the episode ids.
    fn seed_episodes(db: &Database, count: usize) -> Vec<i64> {
        use crate::store::{EpisodeType, NewEpisode};
        let (podcast_id, _) = db
            .get_or_create_podcast("https://example.com/feed.xml", "Merge Show")
            .unwrap();
        (0..count)
            .map(|i| {
                db.insert_episode(&NewEpisode {
                    podcast_id,
                    guid: Some(format!("m-{i}")),
                    title: Some(format!("Episode {i}")),
                    episode_number: None,
                    season_id: None,
                    episode_type: EpisodeType::Full,
                    show_notes: None,
                    episode_url: None,
                    download_url: format!("https://cdn.example/m{i}.mp3"),
                    file_name: None,
                    mime_type: None,
                    file_size: None,
                    duration_seconds: None,
                    release_at: None,
                    explicit: false,
                    cw_present: false,
                    transcript_detected: false,
                })
                .unwrap()
            })
            .collect()
    }

    #[test]
    fn test_merge_unions_edges_and_drops_duplicates() {
        let (db, _temp) = setup_test_db();
        let eps = seed_episodes(&db, 3);
        let a = db.create_person("J. Doe", None, None).unwrap();
        let b = db
            .create_person("Jordan Doe", Some("https://jordan.example"), None)
            .unwrap();
        db.add_host_edge(eps[0], a).unwrap();
        db.add_host_edge(eps[1], a).unwrap();
        db.add_host_edge(eps[1], b).unwrap();
        db.add_host_edge(eps[2], b).unwrap();

        let report = analyze_merge_conflict(&db, a, b).unwrap();
        assert!(!report.is_conflict_free);
        assert_eq!(report.common_host_episodes, vec![eps[1]]);

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let outcome = merge(&db, a, b, now).unwrap();
        assert_eq!(outcome.hosted_moved, 1);
        assert_eq!(outcome.duplicate_edges_dropped, 1);

        let mut hosted = db.hosted_episode_ids(b).unwrap();
        hosted.sort_unstable();
        assert_eq!(hosted, eps);
        assert!(db.hosted_episode_ids(a).unwrap().is_empty());

        let source = db.get_person(a).unwrap().unwrap();
        assert!(source.is_retired());
        assert_eq!(source.merged_into, Some(b));
        assert_eq!(resolve_person(&db, a).unwrap().unwrap().id, b);
        // Retired records drop out of listings.
        assert!(db.list_people().unwrap().iter().all(|p| p.id != a));
    }

    #[test]
    fn test_cross_role_overlap_is_still_a_conflict() {
        let (db, _temp) = setup_test_db();
        let eps = seed_episodes(&db, 1);
        let a = db.create_person("J. Doe", None, None).unwrap();
        let b = db.create_person("Jordan Doe", None, None).unwrap();
        // One hosts the episode the other guests on.
        db.add_host_edge(eps[0], a).unwrap();
        db.add_guest_edge(eps[0], b).unwrap();

        let report = analyze_merge_conflict(&db, a, b).unwrap();
        assert!(report.common_host_episodes.is_empty());
        assert!(report.common_guest_episodes.is_empty());
        assert_eq!(report.common_episodes, vec![eps[0]]);
        assert!(!report.is_conflict_free);
    }

    #[test]
    fn test_merge_inherits_missing_urls() {
        let (db, _temp) = setup_test_db();
        let a = db
            .create_person("J. Doe", Some("https://old.example"), None)
            .unwrap();
        let b = db.create_person("Jordan Doe", None, None).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let outcome = merge(&db, a, b, now).unwrap();
        assert_eq!(
            outcome.destination.url,
            Some("https://old.example".to_string())
        );
    }

    #[test]
    fn test_self_merge_rejected() {
        let (db, _temp) = setup_test_db();
        let a = db.create_person("J. Doe", None, None).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(matches!(merge(&db, a, a, now), Err(MergeError::SelfMerge)));
        assert!(!db.get_person(a).unwrap().unwrap().is_retired());
    }

    #[test]
    fn test_merge_involving_retired_record_rejected() {
        let (db, _temp) = setup_test_db();
        let eps = seed_episodes(&db, 1);
        let a = db.create_person("J. Doe", None, None).unwrap();
        let b = db.create_person("Jordan Doe", None, None).unwrap();
        let c = db.create_person("Jo Doe", None, None).unwrap();
        db.add_guest_edge(eps[0], c).unwrap();

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        merge(&db, a, b, now).unwrap();

        assert!(matches!(
            merge(&db, a, c, now),
            Err(MergeError::SourceRetired(_))
        ));
        assert!(matches!(
            merge(&db, c, a, now),
            Err(MergeError::DestinationRetired(_))
        ));
        // The failed merges left the third person untouched.
        assert!(!db.get_person(c).unwrap().unwrap().is_retired());
        assert_eq!(db.guest_episode_ids(c).unwrap(), eps);
    }

    #[test]
    fn test_merge_unknown_person_rejected() {
        let (db, _temp) = setup_test_db();
        let a = db.create_person("J. Doe", None, None).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            merge(&db, a, 9999, now),
            Err(MergeError::PersonNotFound(9999))
        ));
    }
}

mod structure_tests {
    use crate::store::Database;
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    #[test]
    fn test_episode_cannot_join_another_podcasts_season() {
        use crate::store::{EpisodeType, NewEpisode};
        let (db, _temp) = setup_test_db();
        let (podcast_a, _) = db
            .get_or_create_podcast("https://a.example/feed.xml", "Show A")
            .unwrap();
        let (podcast_b, _) = db
            .get_or_create_podcast("https://b.example/feed.xml", "Show B")
            .unwrap();
        let episode_id = db
            .insert_episode(&NewEpisode {
                podcast_id: podcast_a,
                guid: Some("a-1".to_string()),
                title: None,
                episode_number: None,
                season_id: None,
                episode_type: EpisodeType::Full,
                show_notes: None,
                episode_url: None,
                download_url: "https://cdn.example/a1.mp3".to_string(),
                file_name: None,
                mime_type: None,
                file_size: None,
                duration_seconds: None,
                release_at: None,
                explicit: false,
                cw_present: false,
                transcript_detected: false,
            })
            .unwrap();
        let (foreign_season, _) = db.get_or_create_season(podcast_b, 1).unwrap();

        assert!(db.set_episode_season(episode_id, Some(foreign_season)).is_err());
        let stored = db.get_episode(episode_id).unwrap().unwrap();
        assert_eq!(stored.season_id, None);

        let (own_season, _) = db.get_or_create_season(podcast_a, 1).unwrap();
        db.set_episode_season(episode_id, Some(own_season)).unwrap();
    }

    #[test]
    fn test_category_parent_cycle_rejected() {
        let (db, _temp) = setup_test_db();
        let (root, _) = db.get_or_create_category("Fiction", None).unwrap();
        let (child, _) = db.get_or_create_category("Drama", Some(root)).unwrap();
        let (grandchild, _) = db.get_or_create_category("Audio Drama", Some(child)).unwrap();

        assert!(db.set_category_parent(root, Some(grandchild)).is_err());
        // The existing chain is untouched.
        assert_eq!(db.get_category(root).unwrap().unwrap().parent_id, None);
        assert_eq!(
            db.get_category(grandchild).unwrap().unwrap().parent_id,
            Some(child)
        );
    }

    #[test]
    fn test_same_name_different_parent_is_a_distinct_category() {
        let (db, _temp) = setup_test_db();
        let (comedy_root, created_a) = db.get_or_create_category("Comedy", None).unwrap();
        let (fiction, _) = db.get_or_create_category("Fiction", None).unwrap();
        let (comedy_fiction, created_b) = db
            .get_or_create_category("Comedy", Some(fiction))
            .unwrap();

        assert!(created_a);
        assert!(created_b);
        assert_ne!(comedy_root, comedy_fiction);

        let (again, created) = db.get_or_create_category("Comedy", Some(fiction)).unwrap();
        assert_eq!(again, comedy_fiction);
        assert!(!created);
    }
}

mod group_stats_tests {
    use crate::config::AnalyzerConfig;
    use crate::feed::{NormalizedEpisode, NormalizedFeed};
    use crate::ingest::reconcile_feed;
    use crate::stats::{category_rollup, group_stats, person_appearances, StatScope};
    use crate::store::Database;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn setup_test_db() -> (Database, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let db = Database::new(&db_path).unwrap();
        (db, temp_dir)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn seeded_podcast(db: &Database, slug: &str, episodes: usize, days_between: i64) -> i64 {
        let items: Vec<NormalizedEpisode> = (0..episodes)
            .map(|i| NormalizedEpisode {
                guid: Some(format!("{slug}-{i}")),
                title: Some(format!("Episode {i}")),
                show_notes: None,
                episode_url: None,
                release_at: Some(now() - Duration::days(days_between * (episodes - i) as i64)),
                duration_seconds: Some(1200),
                episode_number: None,
                season_number: None,
                episode_type: "full".to_string(),
                explicit: false,
                enclosure_url: format!("https://cdn.example/{slug}/{i}.mp3"),
                mime_type: Some("audio/mpeg".to_string()),
                file_size: None,
                transcript_detected: false,
                cw_present: false,
                people: Vec::new(),
            })
            .collect();
        let parsed = NormalizedFeed {
            title: slug.to_string(),
            description: None,
            author: None,
            email: None,
            site_url: None,
            language: None,
            generator: None,
            explicit: false,
            itunes_feed_type: None,
            funding_url: None,
            cover_art_url: None,
            keywords: Vec::new(),
            has_itunes_data: true,
            has_podcast_index_data: false,
            categories: vec![crate::feed::CategoryPair {
                name: "Fiction".to_string(),
                parent: None,
            }],
            episodes: items,
            skipped_items: 0,
        };
        reconcile_feed(
            db,
            &format!("https://example.com/{slug}.xml"),
            &parsed,
            &AnalyzerConfig::default(),
            now(),
        )
        .unwrap()
        .podcast_id
    }

    #[test]
    fn test_group_aggregates_member_podcasts() {
        let (db, _temp) = setup_test_db();
        let active = seeded_podcast(&db, "active", 4, 7);
        let stale = seeded_podcast(&db, "stale", 2, 90);

        let group_id = db.create_group("Test Cohort", None).unwrap();
        db.add_podcast_to_group(group_id, active).unwrap();
        db.add_podcast_to_group(group_id, stale).unwrap();

        let stats = group_stats(&db, group_id).unwrap().unwrap();
        assert_eq!(stats.podcast_count, 2);
        assert_eq!(stats.episode_count, 6);
        assert_eq!(stats.dormant_feeds, 1);
        assert_eq!(stats.feeds_with_itunes_data, 2);
        assert_eq!(stats.total_duration_seconds, 6 * 1200);
    }

    #[test]
    fn test_group_category_rollup_counts_distinct_podcasts() {
        let (db, _temp) = setup_test_db();
        let a = seeded_podcast(&db, "alpha", 1, 7);
        let b = seeded_podcast(&db, "beta", 1, 7);

        let group_id = db.create_group("Cohort", None).unwrap();
        db.add_podcast_to_group(group_id, a).unwrap();
        db.add_podcast_to_group(group_id, b).unwrap();

        let rollup = category_rollup(&db, StatScope::Group(group_id)).unwrap();
        assert_eq!(rollup.len(), 1);
        assert_eq!(rollup[0].name, "Fiction");
        assert_eq!(rollup[0].podcast_count, 2);
    }

    #[test]
    fn test_person_appearances_follow_merge_redirect() {
        let (db, _temp) = setup_test_db();
        let podcast_id = seeded_podcast(&db, "gamma", 2, 7);
        let episodes = db.episodes_for_podcast(podcast_id).unwrap();

        let a = db.create_person("Sam Okafor", None, None).unwrap();
        let b = db.create_person("Samuel Okafor", None, None).unwrap();
        db.add_host_edge(episodes[0].id, a).unwrap();
        db.add_guest_edge(episodes[1].id, b).unwrap();
        crate::people::merge(&db, a, b, now()).unwrap();

        // Asking about the retired id reports the surviving record.
        let appearances = person_appearances(&db, a).unwrap().unwrap();
        assert_eq!(appearances.person_id, b);
        assert_eq!(appearances.hosted_podcasts, 1);
        assert_eq!(appearances.guested_podcasts, 1);
        assert_eq!(appearances.distinct_podcasts, 1);
        assert_eq!(appearances.by_podcast[0].hosted_episodes, 1);
        assert_eq!(appearances.by_podcast[0].guested_episodes, 1);
    }
}

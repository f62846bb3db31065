use crate::models::{ChangeEvent, ChangeKind, Record};

/// Upper bound on snapshot size when the caller configures no limit
pub const SAFETY_CEILING: usize = 1000;

/// Apply one change event to a snapshot
///
/// Inserts land at the head (feeds are most-recent-first) and the tail is
/// truncated to `max_size`. An insert for an id already in the snapshot
/// replaces the old entry, so ids stay unique. Updates replace in place and
/// never adopt unseen records. Deletes of absent ids are no-ops.
pub fn apply_event(mut snapshot: Vec<Record>, event: &ChangeEvent, max_size: usize) -> Vec<Record> {
    let id = event.record.id();

    match event.kind {
        ChangeKind::Insert => {
            snapshot.retain(|r| r.id() != id);
            snapshot.insert(0, event.record.clone());
            snapshot.truncate(max_size);
        }
        ChangeKind::Update => {
            if let Some(slot) = snapshot.iter_mut().find(|r| r.id() == id) {
                *slot = event.record.clone();
            }
        }
        ChangeKind::Delete => {
            snapshot.retain(|r| r.id() != id);
        }
    }

    snapshot
}

/// Replay a batch of events in arrival order
pub fn apply_events<'a, I>(snapshot: Vec<Record>, events: I, max_size: usize) -> Vec<Record>
where
    I: IntoIterator<Item = &'a ChangeEvent>,
{
    events
        .into_iter()
        .fold(snapshot, |acc, event| apply_event(acc, event, max_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashSet;

    fn rec(id: i64, status: &str) -> Record {
        Record::new(id).with("status", status)
    }

    fn ids(snapshot: &[Record]) -> Vec<i64> {
        snapshot.iter().filter_map(|r| r.id().as_i64()).collect()
    }

    #[test]
    fn test_insert_prepends() {
        let snapshot = vec![rec(1, "pending")];
        let snapshot = apply_event(snapshot, &ChangeEvent::insert(rec(2, "pending")), 10);
        assert_eq!(ids(&snapshot), vec![2, 1]);
    }

    #[test]
    fn test_insert_truncates_tail() {
        let mut snapshot = Vec::new();
        for id in 1..=5 {
            snapshot = apply_event(snapshot, &ChangeEvent::insert(rec(id, "pending")), 3);
            assert!(snapshot.len() <= 3);
        }
        assert_eq!(ids(&snapshot), vec![5, 4, 3]);
    }

    #[test]
    fn test_update_replaces_in_place() {
        let snapshot = vec![rec(3, "pending"), rec(2, "pending"), rec(1, "pending")];
        let snapshot = apply_event(snapshot, &ChangeEvent::update(rec(2, "completed")), 10);

        assert_eq!(ids(&snapshot), vec![3, 2, 1]);
        assert_eq!(snapshot[1].get("status"), Some(&json!("completed")));
    }

    #[test]
    fn test_update_unknown_id_is_noop() {
        let snapshot = vec![rec(1, "pending")];
        let after = apply_event(snapshot.clone(), &ChangeEvent::update(rec(99, "done")), 10);
        assert_eq!(after, snapshot);
    }

    #[test]
    fn test_delete_removes_and_ignores_absent() {
        let snapshot = vec![rec(2, "a"), rec(1, "b")];
        let snapshot = apply_event(snapshot, &ChangeEvent::delete(Record::new(2)), 10);
        assert_eq!(ids(&snapshot), vec![1]);

        let snapshot = apply_event(snapshot, &ChangeEvent::delete(Record::new(42)), 10);
        assert_eq!(ids(&snapshot), vec![1]);
    }

    #[test]
    fn test_duplicate_insert_keeps_ids_unique() {
        let events = vec![
            ChangeEvent::insert(rec(1, "pending")),
            ChangeEvent::insert(rec(2, "pending")),
            ChangeEvent::insert(rec(1, "processing")),
        ];
        let snapshot = apply_events(Vec::new(), &events, 10);

        assert_eq!(ids(&snapshot), vec![1, 2]);
        assert_eq!(snapshot[0].get_str("status"), Some("processing"));
    }

    #[test]
    fn test_mixed_sequence_matches_last_event() {
        // Deterministic pseudo-random walk over a small id space
        let mut events = Vec::new();
        let mut seed: u64 = 0x5eed;
        for step in 0..400 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let id = ((seed >> 33) % 12) as i64;
            let record = rec(id, &format!("s{}", step));
            events.push(match (seed >> 20) % 3 {
                0 => ChangeEvent::insert(record),
                1 => ChangeEvent::update(record),
                _ => ChangeEvent::delete(record),
            });
        }

        let snapshot = apply_events(Vec::new(), &events, SAFETY_CEILING);

        // Expected: ids that were inserted and not deleted afterwards
        let mut live: HashSet<i64> = HashSet::new();
        for event in &events {
            let id = event.record.id().as_i64().unwrap();
            match event.kind {
                ChangeKind::Insert => {
                    live.insert(id);
                }
                ChangeKind::Update => {}
                ChangeKind::Delete => {
                    live.remove(&id);
                }
            }
        }

        let got = ids(&snapshot);
        let unique: HashSet<i64> = got.iter().copied().collect();
        assert_eq!(got.len(), unique.len(), "ids must be unique");
        assert_eq!(unique, live);

        // Each surviving record carries the payload of its latest insert/update
        for record in &snapshot {
            let latest = events
                .iter()
                .rev()
                .find(|e| e.record.id() == record.id() && e.kind != ChangeKind::Delete)
                .unwrap();
            assert_eq!(record, &latest.record);
        }
    }

    #[test]
    fn test_limit_keeps_most_recent_inserts() {
        let mut snapshot = Vec::new();
        for id in 0..20 {
            snapshot = apply_event(snapshot, &ChangeEvent::insert(rec(id, "x")), 5);
        }
        snapshot = apply_event(snapshot, &ChangeEvent::delete(Record::new(18)), 5);

        assert_eq!(ids(&snapshot), vec![19, 17, 16, 15]);
    }
}

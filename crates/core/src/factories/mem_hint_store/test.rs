use super::*;
use wotfetch_api::Timestamp;
use wotfetch_test_utils::random_identity_id;

fn store() -> MemHintStore {
    MemHintStore::default()
}

fn hint(
    source: &IdentityId,
    target: &IdentityId,
    days: i64,
    capacity: u8,
    score: i32,
    edition: u64,
) -> Hint {
    Hint {
        source: source.clone(),
        target: target.clone(),
        date: DayStamp::from_days(days),
        source_capacity: capacity,
        score_sign: ScoreSign::from_score(score),
        edition,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn iteration_order_matches_reference_comparator() {
    let s = store();
    let ids: Vec<IdentityId> =
        (0..6).map(|_| random_identity_id()).collect();

    let mut expect = Vec::new();
    for (i, source) in ids.iter().enumerate() {
        for (j, target) in ids.iter().enumerate() {
            if i == j {
                continue;
            }
            expect.push(hint(
                source,
                target,
                (i % 3) as i64,
                1 + (j * 17) as u8,
                i as i32 - 3,
                (i * j) as u64,
            ));
        }
    }

    use rand::seq::SliceRandom;
    let mut shuffled = expect.clone();
    shuffled.shuffle(&mut rand::thread_rng());
    for h in shuffled {
        assert_eq!(
            InsertOutcome::Inserted,
            s.insert(h).await.unwrap(),
            "all keys are distinct"
        );
    }

    expect.sort_by(|a, b| a.cmp_priority(b));
    assert_eq!(expect, s.ordered().await.unwrap());
    assert_eq!(expect.len(), s.count().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn editions_never_move_backward() {
    let s = store();
    let a = random_identity_id();
    let t = random_identity_id();

    assert_eq!(
        InsertOutcome::Inserted,
        s.insert(hint(&a, &t, 10, 50, 1, 5)).await.unwrap()
    );
    // Same edition again: duplicate.
    assert_eq!(
        InsertOutcome::Rejected,
        s.insert(hint(&a, &t, 11, 90, 1, 5)).await.unwrap()
    );
    // Older edition: stale.
    assert_eq!(
        InsertOutcome::Rejected,
        s.insert(hint(&a, &t, 11, 90, 1, 4)).await.unwrap()
    );
    // Newer edition replaces, and the stored hint carries the new fields.
    assert_eq!(
        InsertOutcome::Replaced,
        s.insert(hint(&a, &t, 11, 90, 1, 6)).await.unwrap()
    );
    assert_eq!(1, s.count().await.unwrap());
    let got = s
        .get(HintKey {
            source: a.clone(),
            target: t.clone(),
        })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(6, got.edition);
    assert_eq!(90, got.source_capacity);
}

#[tokio::test(flavor = "multi_thread")]
async fn one_hint_per_source_target_pair() {
    let s = store();
    let a = random_identity_id();
    let b = random_identity_id();
    let t = random_identity_id();

    s.insert(hint(&a, &t, 10, 50, 1, 1)).await.unwrap();
    s.insert(hint(&b, &t, 10, 50, 1, 2)).await.unwrap();
    s.insert(hint(&a, &b, 10, 50, 1, 3)).await.unwrap();

    // Three distinct keys coexist, two of them about the same target.
    assert_eq!(3, s.count().await.unwrap());
    s.insert(hint(&a, &t, 12, 50, 1, 9)).await.unwrap();
    assert_eq!(3, s.count().await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn remove_exact_spares_replaced_hints() {
    let s = store();
    let a = random_identity_id();
    let t = random_identity_id();
    let key = HintKey {
        source: a.clone(),
        target: t.clone(),
    };

    s.insert(hint(&a, &t, 10, 50, 1, 3)).await.unwrap();
    // A newer claim lands while edition 3 is being fetched.
    s.insert(hint(&a, &t, 11, 50, 1, 7)).await.unwrap();

    // The failure of the edition-3 attempt must not take out edition 7.
    assert!(!s.remove_exact(key.clone(), 3).await.unwrap());
    assert_eq!(1, s.count().await.unwrap());

    assert!(s.remove_exact(key.clone(), 7).await.unwrap());
    assert_eq!(0, s.count().await.unwrap());
    assert!(!s.remove(key).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn success_prunes_obsolete_hints_for_target() {
    let s = store();
    let ids: Vec<IdentityId> =
        (0..4).map(|_| random_identity_id()).collect();
    let t = random_identity_id();

    s.insert(hint(&ids[0], &t, 10, 50, 1, 2)).await.unwrap();
    s.insert(hint(&ids[1], &t, 10, 50, 1, 5)).await.unwrap();
    s.insert(hint(&ids[2], &t, 10, 50, 1, 9)).await.unwrap();
    // Unrelated target stays untouched.
    s.insert(hint(&ids[3], &ids[0], 10, 50, 1, 1))
        .await
        .unwrap();

    // Fetched edition 5: the claims at 2 and 5 are now obsolete, the
    // claim at 9 still promises something newer.
    assert_eq!(2, s.remove_target_up_to(t.clone(), 5).await.unwrap());
    let left = s.ordered().await.unwrap();
    assert_eq!(2, left.len());
    assert!(left.iter().any(|h| h.target == t && h.edition == 9));
    assert!(left.iter().any(|h| h.target == ids[0]));
}

#[tokio::test(flavor = "multi_thread")]
async fn identity_removal_covers_both_roles() {
    let s = store();
    let gone = random_identity_id();
    let a = random_identity_id();
    let b = random_identity_id();

    s.insert(hint(&gone, &a, 10, 50, 1, 1)).await.unwrap();
    s.insert(hint(&gone, &b, 10, 50, 1, 1)).await.unwrap();
    s.insert(hint(&a, &gone, 10, 50, 1, 1)).await.unwrap();
    s.insert(hint(&a, &b, 10, 50, 1, 1)).await.unwrap();

    assert_eq!(3, s.remove_for_identity(gone.clone()).await.unwrap());
    let left = s.ordered().await.unwrap();
    assert_eq!(1, left.len());
    assert_eq!(a, left[0].source);
    assert_eq!(b, left[0].target);

    // Indexes were cleaned up too.
    assert_eq!(0, s.remove_for_identity(gone).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn select_ready_yields_distinct_unexcluded_targets() {
    let s = store();
    let sources: Vec<IdentityId> =
        (0..3).map(|_| random_identity_id()).collect();
    let t1 = random_identity_id();
    let t2 = random_identity_id();
    let t3 = random_identity_id();

    // Two claims about t1 on different days; the fresher one must be the
    // representative t1 gets.
    s.insert(hint(&sources[0], &t1, 10, 50, 1, 4)).await.unwrap();
    s.insert(hint(&sources[1], &t1, 12, 50, 1, 2)).await.unwrap();
    s.insert(hint(&sources[0], &t2, 11, 50, 1, 7)).await.unwrap();
    s.insert(hint(&sources[2], &t3, 9, 50, 1, 1)).await.unwrap();

    let ready = s.select_ready(vec![t2.clone()], 10).await.unwrap();
    assert_eq!(2, ready.len());
    assert_eq!(t1, ready[0].target);
    assert_eq!(12, ready[0].date.as_days());
    assert_eq!(t3, ready[1].target);

    // Limit applies after exclusion and dedup.
    let ready = s.select_ready(vec![], 2).await.unwrap();
    assert_eq!(2, ready.len());
    assert_eq!(t1, ready[0].target);
    assert_eq!(t2, ready[1].target);
}

#[tokio::test(flavor = "multi_thread")]
async fn self_hint_is_storable() {
    let s = store();
    let own = random_identity_id();
    let h = Hint::new_self(own.clone(), 3);
    assert_eq!(InsertOutcome::Inserted, s.insert(h).await.unwrap());
    let ready = s.select_ready(vec![], 10).await.unwrap();
    assert_eq!(1, ready.len());
    assert_eq!(own, ready[0].source);
    assert_eq!(own, ready[0].target);
    assert_eq!(Timestamp::now().round_to_day(), ready[0].date);
}

//! Funnel conversion over a four-step checkout path.

use chrono::{Duration, Utc};
use eventide_analytics::FunnelEngine;
use eventide_core::EventType;
use eventide_integration_tests::{event_at, funnel_named, insert_event};
use eventide_store::{AnalyticsStore, FunnelRepo};

#[tokio::test]
async fn four_step_funnel_progression() {
    let store = AnalyticsStore::in_memory().await.unwrap();
    let engine = FunnelEngine::new(store.clone());

    let funnel = funnel_named(
        "checkout",
        &[
            EventType::PageView,
            EventType::ButtonClick,
            EventType::CheckoutStart,
            EventType::Purchase,
        ],
    );
    {
        let mut sess = store.session().await.unwrap();
        FunnelRepo.create(&mut sess, &funnel).await.unwrap();
        sess.commit().await.unwrap();
    }

    // 100 viewers; 80 click through; 50 start checkout; 30 purchase
    let t = Utc::now() - Duration::hours(2);
    for i in 0..100 {
        let user = format!("u{}", i);
        insert_event(&store, &event_at(EventType::PageView, &user, t)).await;
        if i < 80 {
            insert_event(
                &store,
                &event_at(EventType::ButtonClick, &user, t + Duration::seconds(1)),
            )
            .await;
        }
        if i < 50 {
            insert_event(
                &store,
                &event_at(EventType::CheckoutStart, &user, t + Duration::seconds(2)),
            )
            .await;
        }
        if i < 30 {
            insert_event(
                &store,
                &event_at(EventType::Purchase, &user, t + Duration::seconds(3)),
            )
            .await;
        }
    }

    let analysis = engine
        .analyze_funnel(&funnel.id, t, t + Duration::hours(1), None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(analysis.total_entered, 100);
    assert_eq!(analysis.total_completed, 30);
    assert_eq!(analysis.overall_conversion_rate, 30.0);

    let completed: Vec<u64> = analysis.steps.iter().map(|s| s.completed).collect();
    assert_eq!(completed, vec![100, 80, 50, 30]);

    // Step laws hold everywhere
    assert!(analysis.total_completed <= analysis.total_entered);
    for step in &analysis.steps {
        assert!(step.completed <= step.entered);
        assert_eq!(step.dropped + step.completed, step.entered);
    }
}

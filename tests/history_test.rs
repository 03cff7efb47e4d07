mod common;

use anyhow::Result;
use bankroll::application::{HistoryQuery, LedgerError};
use bankroll::domain::Direction;
use common::{backends, opening, record_count, register};
use uuid::Uuid;

#[tokio::test]
async fn test_history_unknown_account() -> Result<()> {
    let backends = backends(opening(10_000)).await?;

    for (name, service) in &backends.services {
        let result = service.history(Uuid::new_v4(), 10).await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound(_))), "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_history_empty_account() -> Result<()> {
    let backends = backends(opening(10_000)).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        assert!(service.history(alice.id, 10).await?.is_empty(), "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_history_newest_first_and_capped() -> Result<()> {
    let backends = backends(opening(100_000)).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        let bob = register(service, "Bob").await?;

        for amount in 1..=5 {
            service
                .transfer(alice.id, "bob@bank.test", amount * 100, Some(format!("payment {amount}").as_str()))
                .await?;
        }
        service.transfer(bob.id, "alice@bank.test", 42, None).await?;

        let history = service.history(alice.id, 3).await?;
        assert_eq!(history.len(), 3, "{name}");
        assert_eq!(history[0].direction, Direction::Incoming, "{name}");
        assert_eq!(history[0].amount_cents, 42);
        assert_eq!(history[1].description, "payment 5");
        assert_eq!(history[2].description, "payment 4");

        let sequences: Vec<i64> = history.iter().map(|r| r.sequence).collect();
        assert!(sequences.windows(2).all(|w| w[0] > w[1]), "{name}: {sequences:?}");

        // Only the owner's own records appear.
        let full = service.history(alice.id, 100).await?;
        assert_eq!(full.len(), 6, "{name}");
        assert!(full.iter().all(|r| r.account_id == alice.id));
    }

    Ok(())
}

#[tokio::test]
async fn test_history_read_is_repeatable() -> Result<()> {
    let backends = backends(opening(10_000)).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        register(service, "Bob").await?;
        service.transfer(alice.id, "bob@bank.test", 500, Some("a")).await?;
        service.transfer(alice.id, "bob@bank.test", 700, Some("b")).await?;

        let first = service.history(alice.id, 10).await?;
        let second = service.history(alice.id, 10).await?;
        assert_eq!(first, second, "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_history_zero_limit() -> Result<()> {
    let backends = backends(opening(10_000)).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        register(service, "Bob").await?;
        service.transfer(alice.id, "bob@bank.test", 500, None).await?;

        assert!(service.history(alice.id, 0).await?.is_empty(), "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_history_pages_do_not_overlap() -> Result<()> {
    let backends = backends(opening(100_000)).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        register(service, "Bob").await?;
        for _ in 0..7 {
            service.transfer(alice.id, "bob@bank.test", 100, None).await?;
        }

        let mut seen = Vec::new();
        let mut before = None;
        loop {
            let page = service
                .history_page(
                    alice.id,
                    HistoryQuery {
                        limit: Some(3),
                        before,
                    },
                )
                .await?;
            if page.is_empty() {
                break;
            }
            assert!(page.len() <= 3, "{name}");
            before = page.last().map(|r| r.sequence);
            seen.extend(page.into_iter().map(|r| r.id));
        }

        assert_eq!(seen.len(), 7, "{name}");
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 7, "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_history_default_and_max_limit() -> Result<()> {
    let mut config = opening(100_000);
    config.default_history_limit = 2;
    config.max_history_limit = 4;
    let backends = backends(config).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        register(service, "Bob").await?;
        for _ in 0..6 {
            service.transfer(alice.id, "bob@bank.test", 100, None).await?;
        }

        let default_page = service
            .history_page(alice.id, HistoryQuery::default())
            .await?;
        assert_eq!(default_page.len(), 2, "{name}");

        let clamped = service.history(alice.id, 1_000).await?;
        assert_eq!(clamped.len(), 4, "{name}");
    }

    Ok(())
}

#[tokio::test]
async fn test_paging_reaches_records_beyond_max_limit() -> Result<()> {
    let mut config = opening(100_000);
    config.max_history_limit = 2;
    let backends = backends(config).await?;

    for (name, service) in &backends.services {
        let alice = register(service, "Alice").await?;
        register(service, "Bob").await?;
        for _ in 0..5 {
            service.transfer(alice.id, "bob@bank.test", 100, None).await?;
        }

        assert_eq!(service.history(alice.id, usize::MAX).await?.len(), 2, "{name}");
        assert_eq!(record_count(service, alice.id).await?, 5, "{name}");
    }

    Ok(())
}

//! Portfolio Ledger Integration Tests
//!
//! Runs the ledger on top of the real market data service, so live prices
//! travel from the scripted stream through the shared channel into the
//! ledger's unrealised gains.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, WAIT};
use portfolio_market_data::application::ports::{PriceFeed, StreamCommand, SystemClock};
use portfolio_market_data::{
    ChannelState, Credential, JsonFileStore, KeyValueStore, LedgerError, PortfolioLedger,
};
use rust_decimal::Decimal;

fn ledger_over(h: &Harness) -> PortfolioLedger {
    let feed: Arc<dyn PriceFeed> = Arc::clone(&h.service) as Arc<dyn PriceFeed>;
    PortfolioLedger::new(
        feed,
        Arc::clone(&h.store),
        Arc::new(SystemClock),
        Decimal::from(5000),
    )
}

async fn wait_for_price(ledger: &PortfolioLedger, symbol: &str, price: Decimal) {
    tokio::time::timeout(WAIT, async {
        while ledger.latest_price(symbol) != Some(price) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("price never reached the ledger");
}

#[tokio::test]
async fn live_trades_update_unrealised_gains() {
    let h = Harness::start().await;
    h.accept_token("good", &["AAPL"]).await;
    h.quote("AAPL", 100.0).await;
    h.service.set_credential(Credential::new("good")).await;
    h.connector.with_latest(|link| link.opened());
    h.wait_for_channel(ChannelState::Open).await;

    let ledger = ledger_over(&h);
    ledger.buy_stock("AAPL", Decimal::from(100)).await.unwrap();
    ledger.buy_stock("AAPL", Decimal::from(100)).await.unwrap();

    // Seeded by the quote; one upstream subscription for both shares.
    assert_eq!(ledger.latest_price("AAPL"), Some(Decimal::from(100)));
    assert_eq!(ledger.total_unrealised(), Decimal::ZERO);
    assert_eq!(
        h.connector.with_latest(|link| link.drain_commands()),
        vec![StreamCommand::Subscribe("AAPL".to_string())]
    );

    h.connector.with_latest(|link| link.trades(&[("AAPL", Decimal::from(110))]));
    wait_for_price(&ledger, "AAPL", Decimal::from(110)).await;

    assert_eq!(ledger.unrealised("AAPL"), Decimal::from(20));
    assert_eq!(ledger.balance(), Decimal::from(4800));

    ledger.sell_stock("AAPL", Decimal::from(110)).await.unwrap();
    ledger.sell_stock("AAPL", Decimal::from(110)).await.unwrap();
    assert_eq!(ledger.balance(), Decimal::from(5020));
    assert_eq!(
        h.connector.with_latest(|link| link.drain_commands()),
        vec![StreamCommand::Unsubscribe("AAPL".to_string())]
    );
    assert_eq!(h.service.subscription_stats().callback_count, 0);
}

#[tokio::test]
async fn saved_portfolio_resubscribes_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state.json");

    {
        let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path).unwrap());
        let h = Harness::with_store(store).await;
        h.accept_token("good", &["AAPL", "MSFT"]).await;
        h.quote("AAPL", 100.0).await;
        h.quote("MSFT", 300.0).await;
        h.service.start(Some(Credential::new("good"))).await;

        let ledger = ledger_over(&h);
        ledger.buy_stock("AAPL", Decimal::from(100)).await.unwrap();
        ledger.buy_stock("MSFT", Decimal::from(300)).await.unwrap();
        ledger.shutdown().await;
        ledger.persist().unwrap();
        assert_eq!(h.service.subscription_stats().symbol_count, 0);
    }

    let store: Arc<dyn KeyValueStore> = Arc::new(JsonFileStore::open(&path).unwrap());
    let h = Harness::with_store(store).await;
    h.accept_token("good", &["AAPL", "MSFT"]).await;
    h.quote("AAPL", 105.0).await;
    h.quote("MSFT", 290.0).await;

    // The credential comes back from the store along with the ledger.
    h.service.start(None).await;
    assert!(h.service.is_credential_valid());

    let ledger = ledger_over(&h);
    assert!(ledger.restore().await.unwrap());

    assert_eq!(ledger.balance(), Decimal::from(4600));
    assert_eq!(ledger.shares_owned("AAPL"), 1);
    assert_eq!(ledger.unrealised("AAPL"), Decimal::from(5));
    assert_eq!(ledger.unrealised("MSFT"), Decimal::from(-10));
    assert_eq!(ledger.total_unrealised(), Decimal::from(-5));
    assert_eq!(h.service.subscription_stats().symbol_count, 2);
}

#[tokio::test]
async fn rejected_trades_leave_subscriptions_alone() {
    let h = Harness::start().await;
    h.accept_token("good", &["AAPL"]).await;
    h.service.set_credential(Credential::new("good")).await;
    let ledger = ledger_over(&h);

    let err = ledger
        .buy_stock("AAPL", Decimal::from(6000))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let err = ledger.sell_stock("AAPL", Decimal::from(1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotOwned(_)));

    assert!(ledger.subscribed_symbols().await.is_empty());
    assert_eq!(h.service.subscription_stats().callback_count, 0);
}

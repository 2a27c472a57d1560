//! Metering benchmarks for Beacon.
//!
//! Each iteration meters one billable event through the in-memory ledger,
//! including the optimistic write and, for clicks, the revenue split.

use beacon_ledger::{
    Account, CampaignStatus, Ledger, MeterRequest, NewAccount, NewCampaign, NewContent, PlanTier,
    ReviewDecision, Role,
};
use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use tokio::runtime::Runtime;
use uuid::Uuid;

async fn open(ledger: &Ledger, plan: PlanTier, role: Role, credits: Decimal) -> Account {
    ledger
        .accounts()
        .open(NewAccount {
            name: "Bench".into(),
            email: format!("{}@bench.example.com", Uuid::new_v4().simple()),
            role,
            plan,
            company: None,
            ad_credits: credits,
        })
        .await
        .expect("open account")
}

/// An approved campaign with a budget large enough to outlast the run.
async fn launch(ledger: &Ledger, pricing: serde_json::Value) -> Uuid {
    let owner = open(ledger, PlanTier::Free, Role::Seller, dec!(10000000)).await;
    let input: NewCampaign = serde_json::from_value(json!({
        "campaignName": "Bench",
        "title": "Bench",
        "description": "Bench",
        "image": "https://cdn.example.com/bench.png",
        "destinationUrl": "https://shop.example.com",
        "budget": { "total": "10000000" },
        "pricing": pricing,
    }))
    .expect("campaign input");
    let campaign = ledger
        .metering()
        .create_campaign(owner.id, input)
        .await
        .expect("create campaign");

    let admin = open(ledger, PlanTier::Free, Role::Admin, Decimal::ZERO).await;
    ledger
        .metering()
        .review_campaign(
            admin.id,
            campaign.id,
            ReviewDecision {
                status: CampaignStatus::Active,
                featured: None,
            },
        )
        .await
        .expect("approve campaign");
    campaign.id
}

async fn shipment(ledger: &Ledger) -> Uuid {
    let owner = open(ledger, PlanTier::Pro, Role::Wholesaler, Decimal::ZERO).await;
    let input: NewContent = serde_json::from_value(json!({
        "title": "Bench shipment",
        "origin": { "lat": 22.5431, "lon": 114.0579 },
        "destination": { "lat": 45.764, "lon": 4.8357 },
    }))
    .expect("content input");
    ledger
        .shipments()
        .create(owner.id, input)
        .await
        .expect("create shipment")
        .id
}

fn bench_impression(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let ledger = Ledger::in_memory();
    let campaign = rt.block_on(launch(&ledger, json!({ "type": "cpm", "amount": "20" })));

    let mut group = c.benchmark_group("metering");
    group.throughput(Throughput::Elements(1));
    group.bench_function("impression", |b| {
        let ledger = &ledger;
        b.to_async(&rt).iter(|| async move {
            ledger
                .metering()
                .record_impression(black_box(campaign), MeterRequest::default())
                .await
        })
    });
    group.finish();
}

fn bench_click_with_revenue_share(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let ledger = Ledger::in_memory();
    let (campaign, content) = rt.block_on(async {
        let campaign = launch(&ledger, json!({ "type": "cpc", "amount": "0.5" })).await;
        (campaign, shipment(&ledger).await)
    });

    let mut group = c.benchmark_group("metering");
    group.throughput(Throughput::Elements(1));
    group.bench_function("click_with_revenue_share", |b| {
        let ledger = &ledger;
        b.to_async(&rt).iter(|| async move {
            ledger
                .metering()
                .record_click(
                    black_box(campaign),
                    MeterRequest {
                        event_id: Some(Uuid::new_v4()),
                        content_id: Some(content),
                    },
                )
                .await
        })
    });
    group.finish();
}

/// Replays of one event id only hit the idempotency window.
fn bench_duplicate_replay(c: &mut Criterion) {
    let rt = Runtime::new().expect("runtime");
    let ledger = Ledger::in_memory();
    let campaign = rt.block_on(launch(&ledger, json!({ "type": "cpc", "amount": "0.5" })));
    let request = MeterRequest {
        event_id: Some(Uuid::new_v4()),
        content_id: None,
    };
    rt.block_on(ledger.metering().record_click(campaign, request))
        .expect("first click");

    c.bench_function("metering/duplicate_replay", |b| {
        let ledger = &ledger;
        b.to_async(&rt).iter(|| async move {
            ledger
                .metering()
                .record_click(black_box(campaign), request)
                .await
        })
    });
}

criterion_group!(
    benches,
    bench_impression,
    bench_click_with_revenue_share,
    bench_duplicate_replay,
);
criterion_main!(benches);

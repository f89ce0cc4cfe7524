//! Demonstrates optimistic concurrency control for concurrent writers.
//!
//! Every entity with a concurrency stamp is written conditionally: an update
//! or delete only succeeds if the stored token still matches the one the
//! context loaded. This example shows a conflict being detected and resolved
//! by reloading and retrying.
//!
//! Run with: `cargo run --example optimistic_concurrency --features test-util`

use custodian::{
    AuditInfo, CancellationToken, DataContext, Entity, ObjectState, SaveError, SessionContext,
    store::inmemory,
    test::{SequentialStamps, StorageTestExt},
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Entity
// =============================================================================

#[derive(Clone, Serialize, Deserialize, Entity)]
#[entity(kind = "inventory.item")]
pub struct InventoryItem {
    id: String,
    available: u32,
    #[entity(concurrency_stamp)]
    concurrency_stamp: Option<String>,
    #[entity(audit)]
    #[serde(flatten)]
    audit: AuditInfo,
    #[serde(skip)]
    state: ObjectState,
}

impl InventoryItem {
    fn new(id: &str, available: u32) -> Self {
        Self {
            id: id.to_string(),
            available,
            concurrency_stamp: None,
            audit: AuditInfo::default(),
            state: ObjectState::Added,
        }
    }

    fn reserve(&mut self, quantity: u32) -> Result<(), InventoryError> {
        if quantity > self.available {
            return Err(InventoryError::InsufficientStock {
                requested: quantity,
                available: self.available,
            });
        }
        self.available -= quantity;
        self.state = ObjectState::Modified;
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InventoryError {
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: u32, available: u32 },
}

// =============================================================================
// Example Parts
// =============================================================================

type Context = DataContext<inmemory::Store>;

fn context(store: &inmemory::Store, writer: &str) -> Context {
    DataContext::new(store.clone()).with_stamps(SequentialStamps::new(writer))
}

/// Part 1: an uncontested write.
async fn part1_basic_usage(
    store: &inmemory::Store,
    session: &SessionContext,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("PART 1: Basic optimistic concurrency usage\n");

    let mut ctx = context(store, "setup");
    ctx.add(InventoryItem::new("SKU-001", 100))?;
    ctx.save_changes(session, &CancellationToken::new()).await?;
    let item = ctx.get::<InventoryItem>(&"SKU-001".to_string()).ok_or("not tracked")?;
    println!(
        "1. Stocked SKU-001 with {} units, token {:?}\n",
        item.available, item.concurrency_stamp
    );
    Ok(())
}

/// Part 2: two writers load the same row; the second one to save loses.
async fn part2_conflict_detection(
    store: &inmemory::Store,
    session: &SessionContext,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("PART 2: Demonstrating conflict detection\n");
    let id = "SKU-001".to_string();

    let mut alice = context(store, "alice");
    let mut bob = context(store, "bob");
    alice.find::<InventoryItem>(session, &id).await?;
    bob.find::<InventoryItem>(session, &id).await?;

    println!("2. Alice reserves 30 units...");
    alice
        .get_mut::<InventoryItem>(&id)
        .ok_or("not tracked")?
        .reserve(30)?;
    alice.save_changes(session, &CancellationToken::new()).await?;

    println!("3. Bob reserves 20 units from his stale copy...");
    bob.get_mut::<InventoryItem>(&id)
        .ok_or("not tracked")?
        .reserve(20)?;
    match bob.save_changes(session, &CancellationToken::new()).await {
        Err(SaveError::Concurrency(conflict)) => {
            println!("   Rejected: {conflict}\n");
        }
        Ok(_) => println!("   Unexpectedly succeeded!\n"),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

/// Part 3: reload and retry until the write goes through.
async fn part3_retry_pattern(
    store: &inmemory::Store,
    session: &SessionContext,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("PART 3: Retry pattern for handling conflicts\n");
    let id = "SKU-001".to_string();
    let mut ctx = context(store, "carol");
    ctx.find::<InventoryItem>(session, &id).await?;

    // Another service instance gets in first.
    let mut elsewhere = ctx.get::<InventoryItem>(&id).ok_or("not tracked")?.clone();
    elsewhere.available -= 5;
    store.inject_concurrent_write(&elsewhere, "other-1").await?;
    println!("4. Injected a concurrent reservation of 5 units");

    for attempt in 1..=3 {
        ctx.get_mut::<InventoryItem>(&id)
            .ok_or("not tracked")?
            .reserve(10)?;
        match ctx.save_changes(session, &CancellationToken::new()).await {
            Ok(_) => {
                println!("5. Reserved 10 units on attempt {attempt}");
                break;
            }
            Err(SaveError::Concurrency(_)) => {
                println!("   Attempt {attempt} conflicted, reloading");
                ctx.clear();
                ctx.find::<InventoryItem>(session, &id).await?;
            }
            Err(e) => return Err(e.into()),
        }
    }

    let item = ctx.get::<InventoryItem>(&id).ok_or("not tracked")?;
    println!("   Final available: {} (100 - 30 - 5 - 10 = 55)\n", item.available);
    Ok(())
}

/// Part 4: business rules run against the state that was actually loaded.
async fn part4_business_rules(
    store: &inmemory::Store,
    session: &SessionContext,
) -> Result<(), Box<dyn std::error::Error>> {
    println!("PART 4: Business rules with optimistic concurrency\n");
    let id = "SKU-001".to_string();
    let mut ctx = context(store, "dave");
    let item = ctx
        .find::<InventoryItem>(session, &id)
        .await?
        .ok_or("missing")?;

    println!("6. Attempting to reserve 80 units...");
    match item.reserve(80) {
        Err(InventoryError::InsufficientStock {
            requested,
            available,
        }) => {
            println!("   Correctly rejected: requested {requested}, available {available}");
        }
        Ok(()) => println!("   Unexpectedly succeeded!"),
    }
    Ok(())
}

fn print_summary() {
    println!("\n=== Example Complete ===");
    println!("\nKey takeaways:");
    println!("  1. Entities with a concurrency stamp get a fresh token on every write");
    println!("  2. Updates and deletes are conditioned on the token the context loaded");
    println!("  3. A conflict writes nothing; reload and retry");
    println!("  4. Business rules always run against freshly loaded state after a retry");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Optimistic Concurrency Example ===\n");
    let store = inmemory::Store::new();
    let session = SessionContext::for_user(1);

    part1_basic_usage(&store, &session).await?;
    part2_conflict_detection(&store, &session).await?;
    part3_retry_pattern(&store, &session).await?;
    part4_business_rules(&store, &session).await?;

    print_summary();
    Ok(())
}

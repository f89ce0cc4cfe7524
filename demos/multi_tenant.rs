//! Demonstrates the global query filter for a multi-tenant, soft-deleting
//! entity.
//!
//! Two tenants share one store. Each session only ever sees its own rows, new
//! rows inherit the session's tenant, and soft-deleted rows disappear from
//! every filtered query.
//!
//! Run with: `cargo run --example multi_tenant --features test-util`

use custodian::{
    AuditInfo, CancellationToken, DataContext, DomainEvent, Entity, ObjectState, SessionContext,
    store::inmemory,
    test::RecordingPublisher,
};
use serde::{Deserialize, Serialize};

// =============================================================================
// Domain Events
// =============================================================================

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProjectOpened {
    pub name: String,
}

impl DomainEvent for ProjectOpened {
    const KIND: &'static str = "project.opened";
}

// =============================================================================
// Entity
// =============================================================================

#[derive(Clone, Serialize, Deserialize, Entity)]
#[entity(kind = "project", events(ProjectOpened))]
pub struct Project {
    id: u64,
    name: String,
    #[entity(soft_delete)]
    is_deleted: bool,
    #[entity(tenant)]
    tenant_id: Option<i64>,
    #[entity(audit)]
    #[serde(flatten)]
    audit: AuditInfo,
    #[entity(events)]
    #[serde(skip)]
    events: Vec<ProjectEvent>,
    #[serde(skip)]
    state: ObjectState,
}

impl Project {
    fn open(id: u64, name: &str) -> Self {
        Self {
            id,
            name: name.to_string(),
            is_deleted: false,
            tenant_id: None,
            audit: AuditInfo::default(),
            events: vec![
                ProjectOpened {
                    name: name.to_string(),
                }
                .into(),
            ],
            state: ObjectState::Added,
        }
    }
}

fn names(projects: &[&Project]) -> Vec<String> {
    projects.iter().map(|p| p.name.clone()).collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("=== Multi-Tenant Example ===\n");

    let store = inmemory::Store::new();
    let publisher = RecordingPublisher::default();
    let acme = SessionContext::for_user(10).with_tenant(1);
    let globex = SessionContext::for_user(20).with_tenant(2);
    let admin = SessionContext::system();

    println!("1. Each tenant opens projects; rows inherit the session tenant");
    let mut ctx = DataContext::new(store.clone()).with_publisher(publisher.clone());
    ctx.add(Project::open(1, "Rocket skates"))?;
    ctx.add(Project::open(2, "Giant magnet"))?;
    ctx.save_changes(&acme, &CancellationToken::new()).await?;
    ctx.add(Project::open(3, "Hammock district"))?;
    ctx.save_changes(&globex, &CancellationToken::new()).await?;
    println!("   Published: {:?}\n", publisher.recorded_kinds());

    println!("2. Fresh contexts see only their tenant's rows");
    let mut ctx = DataContext::new(store.clone());
    println!("   Acme:   {:?}", names(&ctx.load::<Project>(&acme).await?));
    println!("   Globex: {:?}", names(&ctx.load::<Project>(&globex).await?));
    println!("   Admin:  {:?}\n", names(&ctx.load::<Project>(&admin).await?));

    println!("3. Acme soft-deletes a project");
    let mut ctx = DataContext::new(store.clone());
    let project = ctx
        .find::<Project>(&acme, &2)
        .await?
        .ok_or("project 2 not visible to Acme")?;
    project.is_deleted = true;
    project.state = ObjectState::Modified;
    ctx.save_changes(&acme, &CancellationToken::new()).await?;

    let mut ctx = DataContext::new(store.clone());
    println!("   Acme now sees: {:?}", names(&ctx.load::<Project>(&acme).await?));
    println!(
        "   Rows still stored: {}",
        ctx.load_unfiltered::<Project>().await?.len()
    );

    println!("\n=== Example Complete ===");
    Ok(())
}

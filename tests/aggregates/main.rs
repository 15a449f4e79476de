//! Integration tests for aggregate writes: create with deferred keys,
//! update reconciliation of owned children, delete and the dirty check.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use generic_repo::session::EntryState;
use generic_repo::{
    InMemoryStore, Repository, RepositoryDependencies, RepositoryQueryOptions, Session,
    StaticUser, UnitOfWork,
};
use support::{
    session, Companies, Company, Department, Departments, Invoice, Invoices, People, Person, Team,
};
use uuid::Uuid;

fn companies(session: &Arc<Session>) -> Repository<Companies> {
    Repository::new(session.clone(), Companies, RepositoryDependencies::default())
}

async fn save(session: &Arc<Session>) -> usize {
    UnitOfWork::new(session.clone(), StaticUser(Uuid::new_v4()))
        .save_changes()
        .await
        .unwrap()
}

async fn load(session: &Arc<Session>, id: i64) -> Company {
    companies(session)
        .get_by_id(&id, RepositoryQueryOptions::default().required())
        .await
        .unwrap()
        .unwrap()
}

/// Acme with Sales (teams A and B) and Support (no teams).
async fn seed(store: &InMemoryStore) -> i64 {
    let session = session(store);
    let company = Company::new("Acme")
        .with_department(
            Department::new("Sales")
                .with_team(Team::new("A"))
                .with_team(Team::new("B")),
        )
        .with_department(Department::new("Support"));
    let created = companies(&session).create(company).await.unwrap();
    save(&session).await;
    created.key().unwrap().unwrap()
}

fn team_names(department: &Department) -> Vec<&str> {
    department.teams.iter().map(|t| t.name.as_str()).collect()
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn generated_keys_are_available_after_save() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let person = Uuid::new_v4();
    let company = Company::new("Acme").with_department(
        Department::new("Ops").with_team(Team::new("Platform").with_member(person, "lead")),
    );

    let created = companies(&session).create(company).await.unwrap();
    assert_eq!(created.key().unwrap(), None);
    assert!(created.key_accessor().require().is_err());
    // Staged under temporary keys until the save.
    assert!(created.entity.id < 0);
    assert_eq!(created.entity.departments[0].company_id, created.entity.id);

    assert_eq!(save(&session).await, 4);
    let id = created.key().unwrap().unwrap();
    assert!(id > 0);

    let loaded = load(&session, id).await;
    let ops = &loaded.departments[0];
    assert_eq!(ops.company_id, id);
    let platform = &ops.teams[0];
    assert_eq!(platform.department_id, ops.id);
    assert_eq!(platform.members[0].team_id, platform.id);
    assert_eq!(platform.members[0].person_id, person);
    assert_eq!(loaded.row_version, 1);
}

#[tokio::test]
async fn explicit_keys_are_available_immediately() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let people = Repository::new(session.clone(), People, RepositoryDependencies::default());
    let alice = Person::new("Alice");

    let created = people.create(alice.clone()).await.unwrap();
    assert_eq!(created.key().unwrap(), Some(alice.id));

    save(&session).await;
    assert!(people.exists(&alice.id).await.unwrap());
}

#[tokio::test]
async fn creating_a_tracked_key_twice_is_rejected() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let people = Repository::new(session.clone(), People, RepositoryDependencies::default());
    let alice = Person::new("Alice");

    people.create(alice.clone()).await.unwrap();
    let err = people.create(alice).await.unwrap_err();
    assert!(matches!(err, generic_repo::RepositoryError::InvalidArgument(_)));
}

#[tokio::test]
async fn created_aggregate_is_modified_until_saved() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let repo = companies(&session);

    let created = repo
        .create(Company::new("Acme").with_department(Department::new("Sales")))
        .await
        .unwrap();
    assert!(repo.is_aggregate_modified(&created.entity).await.unwrap());

    save(&session).await;
    assert!(!repo.is_aggregate_modified(&created.entity).await.unwrap());
}

#[tokio::test]
async fn created_aggregate_can_be_updated_before_saving() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let repo = companies(&session);

    let created = repo
        .create(Company::new("Acme").with_department(Department::new("Sales").with_team(Team::new("A"))))
        .await
        .unwrap();
    let mut incoming = created.entity.clone();
    incoming.name = "Acme Holdings".into();
    incoming.departments[0].teams.push(Team::new("B"));
    incoming.departments.push(Department::new("Support"));

    let updated = repo.update(incoming).await.unwrap();
    assert_eq!(updated.departments.len(), 2);
    assert_eq!(team_names(updated.department("Sales").unwrap()), vec!["A", "B"]);

    assert_eq!(save(&session).await, 5);
    let reloaded = load(&session, created.key().unwrap().unwrap()).await;
    assert_eq!(reloaded.name, "Acme Holdings");
    assert_eq!(team_names(reloaded.department("Sales").unwrap()), vec!["A", "B"]);
    assert!(reloaded.department("Support").is_some());
}

#[tokio::test]
async fn renamed_key_fields_link_children() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let invoices = Repository::new(session.clone(), Invoices, RepositoryDependencies::default());

    let created = invoices
        .create(Invoice::new("Acme").with_line("Widgets").with_line("Gadgets"))
        .await
        .unwrap();
    save(&session).await;
    let number = created.key().unwrap().unwrap();

    let loaded = invoices
        .get_by_id(&number, RepositoryQueryOptions::default().required())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.lines.len(), 2);
    assert!(loaded.lines.iter().all(|l| l.invoice_no == number && l.id > 0));
}

// ============================================================================
// Update
// ============================================================================

#[tokio::test]
async fn update_inserts_updates_and_removes_children() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);

    let mut incoming = load(&session, id).await;
    let sales = incoming
        .departments
        .iter_mut()
        .find(|d| d.name == "Sales")
        .unwrap();
    sales.teams.retain(|t| t.name == "A");
    sales.teams[0].name = "A'".into();
    sales.teams.push(Team::new("C"));

    let updated = companies(&session).update(incoming).await.unwrap();
    let sales = updated.department("Sales").unwrap();
    assert_eq!(team_names(sales), vec!["A'", "C"]);
    assert!(companies(&session).is_aggregate_modified(&updated).await.unwrap());

    save(&session).await;
    let reloaded = load(&session, id).await;
    let sales = reloaded.department("Sales").unwrap();
    assert_eq!(team_names(sales), vec!["A'", "C"]);
    assert!(sales.teams.iter().all(|t| t.department_id == sales.id && t.id > 0));
    assert_eq!(store.row_count("teams").unwrap(), 2);
    assert_eq!(reloaded.department("Support").unwrap().name, "Support");
}

#[tokio::test]
async fn repeated_updates_share_one_save() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);
    let repo = companies(&session);

    let mut incoming = load(&session, id).await;
    incoming
        .departments
        .iter_mut()
        .find(|d| d.name == "Support")
        .unwrap()
        .teams
        .push(Team::new("Helpdesk"));
    let mut updated = repo.update(incoming).await.unwrap();

    let support = updated
        .departments
        .iter_mut()
        .find(|d| d.name == "Support")
        .unwrap();
    support.teams[0].name = "Service Desk".into();
    support.teams.push(Team::new("Escalations"));
    updated
        .departments
        .iter_mut()
        .find(|d| d.name == "Sales")
        .unwrap()
        .teams
        .retain(|t| t.name == "A");
    let updated = repo.update(updated).await.unwrap();
    assert_eq!(
        team_names(updated.department("Support").unwrap()),
        vec!["Service Desk", "Escalations"]
    );
    assert!(repo.is_aggregate_modified(&updated).await.unwrap());

    save(&session).await;
    let reloaded = load(&session, id).await;
    let support = reloaded.department("Support").unwrap();
    assert_eq!(team_names(support), vec!["Service Desk", "Escalations"]);
    assert!(support.teams.iter().all(|t| t.id > 0 && t.department_id == support.id));
    assert_eq!(team_names(reloaded.department("Sales").unwrap()), vec!["A"]);
    assert_eq!(store.row_count("teams").unwrap(), 3);
}

#[tokio::test]
async fn staged_removal_survives_a_second_update() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);
    let repo = companies(&session);

    let mut incoming = load(&session, id).await;
    incoming.departments.retain(|d| d.name != "Support");
    let mut updated = repo.update(incoming).await.unwrap();
    assert!(updated.department("Support").is_none());

    updated.name = "Acme Two".into();
    let updated = repo.update(updated).await.unwrap();
    assert!(updated.department("Support").is_none());

    save(&session).await;
    let reloaded = load(&session, id).await;
    assert_eq!(reloaded.name, "Acme Two");
    assert!(reloaded.department("Support").unwrap().is_deleted);
}

#[tokio::test]
async fn unchanged_graph_stages_nothing() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);

    let incoming = load(&session, id).await;
    let updated = companies(&session).update(incoming.clone()).await.unwrap();
    assert_eq!(updated, incoming);
    assert!(!companies(&session).is_aggregate_modified(&updated).await.unwrap());
    assert_eq!(save(&session).await, 0);
}

#[tokio::test]
async fn removed_child_alone_marks_the_aggregate_modified() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);

    let mut incoming = load(&session, id).await;
    incoming
        .departments
        .iter_mut()
        .for_each(|d| d.teams.retain(|t| t.name != "B"));

    let updated = companies(&session).update(incoming).await.unwrap();
    assert!(companies(&session).is_aggregate_modified(&updated).await.unwrap());

    let tracker = session.tracker().await;
    let deleted = tracker
        .entries()
        .filter(|e| e.state() == EntryState::Deleted)
        .count();
    assert_eq!(deleted, 1);
    assert!(tracker
        .entries()
        .filter(|e| e.table() == "companies")
        .all(|e| e.state() == EntryState::Unchanged));
}

#[tokio::test]
async fn removed_department_is_soft_deleted_with_its_teams() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);

    let mut incoming = load(&session, id).await;
    incoming.departments.retain(|d| d.name != "Sales");
    companies(&session).update(incoming).await.unwrap();
    save(&session).await;

    // Soft-deleted rows still load through the owned navigation.
    let reloaded = load(&session, id).await;
    let sales = reloaded.department("Sales").unwrap();
    assert!(sales.is_deleted);
    assert!(sales.deleted_at.is_some());
    assert!(sales.deleted_by.is_some());
    assert!(sales.teams.is_empty());
    assert_eq!(store.row_count("teams").unwrap(), 0);
    assert!(!reloaded.department("Support").unwrap().is_deleted);
}

#[tokio::test]
async fn composite_keyed_children_are_updated_in_place() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let person = Uuid::new_v4();
    let company = Company::new("Acme").with_department(
        Department::new("Ops").with_team(Team::new("Platform").with_member(person, "engineer")),
    );
    let created = companies(&session).create(company).await.unwrap();
    save(&session).await;
    let id = created.key().unwrap().unwrap();

    let mut incoming = load(&session, id).await;
    incoming.departments[0].teams[0].members[0].role = "lead".into();
    companies(&session).update(incoming).await.unwrap();
    {
        let tracker = session.tracker().await;
        let members: Vec<EntryState> = tracker
            .entries()
            .filter(|e| e.table() == "team_members")
            .map(|e| e.state())
            .collect();
        assert_eq!(members, vec![EntryState::Modified]);
    }
    save(&session).await;

    let reloaded = load(&session, id).await;
    let member = &reloaded.departments[0].teams[0].members[0];
    assert_eq!((member.person_id, member.role.as_str()), (person, "lead"));
    assert_eq!(store.row_count("team_members").unwrap(), 1);
}

#[tokio::test]
async fn update_of_a_missing_aggregate_is_not_found() {
    let store = InMemoryStore::new();
    seed(&store).await;
    let session = session(&store);

    let mut ghost = Company::new("Ghost");
    ghost.id = 404;
    let err = companies(&session).update(ghost).await.unwrap_err();
    assert!(err.is_not_found());

    let err = companies(&session).update(Company::new("Unsaved")).await.unwrap_err();
    assert!(matches!(err, generic_repo::RepositoryError::InvalidArgument(_)));
}

#[tokio::test]
async fn creation_audit_fields_survive_an_update() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);

    let original = load(&session, id).await;
    assert!(original.created_at.is_some());
    let mut incoming = original.clone();
    incoming.name = "Acme Holdings".into();
    incoming.created_at = None;
    incoming.created_by = None;

    let updated = companies(&session).update(incoming).await.unwrap();
    assert_eq!(updated.created_at, original.created_at);
    assert_eq!(updated.created_by, original.created_by);
    assert_eq!(updated.name, "Acme Holdings");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn delete_removes_the_loaded_graph() {
    let store = InMemoryStore::new();
    let id = seed(&store).await;
    let session = session(&store);
    let repo = companies(&session);

    let company = load(&session, id).await;
    repo.delete(&company).await.unwrap();
    assert!(repo.is_aggregate_modified(&company).await.unwrap());
    save(&session).await;

    assert!(!repo.exists(&id).await.unwrap());
    assert_eq!(store.row_count("teams").unwrap(), 0);
    // Departments are soft-deletable and stay behind flagged.
    let departments = Repository::new(session.clone(), Departments, RepositoryDependencies::default());
    let flagged = departments.get_all(Default::default()).await.unwrap();
    assert_eq!(flagged.len(), 2);
    assert!(flagged.iter().all(|d| d.is_deleted));
}

//! Integration tests for repository reads: lookups by key, paged queries,
//! id lists, soft delete, search, sorting, projections and access policies.

#[path = "../support/mod.rs"]
mod support;

use std::sync::Arc;

use generic_repo::{
    AccessPolicy, InMemoryStore, PagedResult, Projections, QueryParams, Repository,
    RepositoryConfig, RepositoryDependencies, RepositoryError, RepositoryQueryOptions, Session,
    SortDirection, StaticUser, StringPropertyFilter, TextMatch, UnitOfWork,
};
use support::{
    session, Companies, Company, CompanyFilters, Department, Departments, People, Person,
    PersonSummary, Team, TeamMembers,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn repo<C: RepositoryConfig>(session: &Arc<Session>, config: C) -> Repository<C> {
    Repository::new(session.clone(), config, RepositoryDependencies::default())
}

fn required() -> RepositoryQueryOptions {
    RepositoryQueryOptions::default().required()
}

async fn save(session: &Arc<Session>) {
    UnitOfWork::new(session.clone(), StaticUser(Uuid::new_v4()))
        .save_changes()
        .await
        .unwrap();
}

async fn seed_companies(store: &InMemoryStore, names: &[&str]) -> Vec<i64> {
    let session = session(store);
    let companies = repo(&session, Companies);
    let mut created = Vec::new();
    for name in names {
        created.push(companies.create(Company::new(name)).await.unwrap());
    }
    save(&session).await;
    created
        .iter()
        .map(|c| c.key().unwrap().unwrap())
        .collect()
}

async fn seed_numbered(store: &InMemoryStore, count: usize) -> Vec<i64> {
    let names: Vec<String> = (1..=count).map(|i| format!("Company {:02}", i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    seed_companies(store, &names).await
}

fn names(page: &PagedResult<Company>) -> Vec<&str> {
    page.results.iter().map(|c| c.name.as_str()).collect()
}

// ============================================================================
// Lookups by key
// ============================================================================

#[tokio::test]
async fn get_by_id_of_a_missing_entity() {
    let store = InMemoryStore::new();
    seed_companies(&store, &["Acme"]).await;
    let companies = repo(&session(&store), Companies);

    let found = companies
        .get_by_id(&123123123, Default::default())
        .await
        .unwrap();
    assert!(found.is_none());

    let err = companies.get_by_id(&123123123, required()).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Company with id 123123123 was not found.");
}

#[tokio::test]
async fn get_by_id_loads_the_owned_graph() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let companies = repo(&session, Companies);
    let company = Company::new("Acme")
        .with_department(Department::new("Sales").with_team(Team::new("Inside")))
        .with_department(Department::new("Support"));
    let created = companies.create(company).await.unwrap();
    save(&session).await;
    let id = created.key().unwrap().unwrap();

    let loaded = companies.get_by_id(&id, required()).await.unwrap().unwrap();
    assert_eq!(loaded.departments.len(), 2);
    let sales = loaded.department("Sales").unwrap();
    assert_eq!(sales.company_id, id);
    assert_eq!(sales.teams[0].name, "Inside");

    let bare = companies
        .get_by_id(&id, RepositoryQueryOptions::bare())
        .await
        .unwrap()
        .unwrap();
    assert!(bare.departments.is_empty());
}

#[tokio::test]
async fn exists_and_must_exist() {
    let store = InMemoryStore::new();
    let ids = seed_companies(&store, &["Acme"]).await;
    let companies = repo(&session(&store), Companies);

    assert!(companies.exists(&ids[0]).await.unwrap());
    assert!(!companies.exists(&999).await.unwrap());
    companies.must_exist(&ids[0]).await.unwrap();
    assert!(companies.must_exist(&999).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn exists_many_returns_the_existing_subset() {
    let store = InMemoryStore::new();
    let ids = seed_companies(&store, &["Acme", "Globex"]).await;
    let companies = repo(&session(&store), Companies);

    let mut found = companies
        .exists_many(&[ids[1], 404, ids[0]], Default::default())
        .await
        .unwrap();
    found.sort();
    assert_eq!(found, ids);

    let err = companies
        .exists_many(&[ids[0], 404], required())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.to_string(), "Company was not found.");
}

#[tokio::test]
async fn composite_keys_match_per_key() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
    let company = Company::new("Acme").with_department(
        Department::new("Ops").with_team(
            Team::new("Platform")
                .with_member(alice, "lead")
                .with_member(bob, "engineer"),
        ),
    );
    repo(&session, Companies).create(company).await.unwrap();
    save(&session).await;

    let members = repo(&session, TeamMembers);
    let all = members.get_all(Default::default()).await.unwrap();
    assert_eq!(all.len(), 2);
    let team_id = all[0].team_id;
    assert!(team_id > 0);

    let lead = members
        .get_by_id(&(team_id, alice), required())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(lead.role, "lead");

    // Same team, unknown person; and a known person on another team.
    let found = members
        .exists_many(
            &[(team_id, bob), (team_id, Uuid::new_v4()), (team_id + 1, alice)],
            Default::default(),
        )
        .await
        .unwrap();
    assert_eq!(found, vec![(team_id, bob)]);
}

// ============================================================================
// Paged queries
// ============================================================================

#[tokio::test]
async fn pages_are_windows_of_the_sorted_matches() {
    let store = InMemoryStore::new();
    seed_numbered(&store, 25).await;
    let companies = repo(&session(&store), Companies);

    let params = QueryParams::new()
        .page(2, 10)
        .sort("name", SortDirection::Desc);
    let page = companies.get(&params, Default::default()).await.unwrap();
    assert_eq!(page.total_count, 25);
    assert_eq!(page.page_number, 2);
    assert_eq!(page.page_size, 10);
    assert_eq!(names(&page).first(), Some(&"Company 15"));
    assert_eq!(names(&page).last(), Some(&"Company 06"));

    let again = companies.get(&params, Default::default()).await.unwrap();
    assert_eq!(again, page);

    let last = companies
        .get(&QueryParams::new().page(3, 10), Default::default())
        .await
        .unwrap();
    assert_eq!(last.len(), 5);
    assert_eq!(names(&last).first(), Some(&"Company 21"));
}

#[tokio::test]
async fn page_values_below_one_use_defaults() {
    let store = InMemoryStore::new();
    seed_numbered(&store, 3).await;
    let companies = repo(&session(&store), Companies);

    let page = companies
        .get(&QueryParams::new().page(0, -1), Default::default())
        .await
        .unwrap();
    assert_eq!(page.page_number, 1);
    assert_eq!(page.page_size, 20);
    assert_eq!(page.len(), 3);
}

#[tokio::test]
async fn id_lists_allow_and_deny() {
    let store = InMemoryStore::new();
    let ids = seed_numbered(&store, 5).await;
    let companies = repo(&session(&store), Companies);

    let allowed = companies
        .get(&QueryParams::new().ids(vec![ids[0], ids[2]]), Default::default())
        .await
        .unwrap();
    assert_eq!(names(&allowed), vec!["Company 01", "Company 03"]);

    let denied = companies
        .count(&QueryParams::new().excluding_ids(vec![ids[0], ids[2]]), Default::default())
        .await
        .unwrap();
    assert_eq!(denied, 3);

    let nothing_denied = companies
        .count(&QueryParams::new().excluding_ids(vec![]), Default::default())
        .await
        .unwrap();
    assert_eq!(nothing_denied, 5);
}

#[tokio::test]
async fn an_empty_id_list_selects_nothing() {
    let store = InMemoryStore::new();
    seed_numbered(&store, 3).await;
    let companies = repo(&session(&store), Companies);
    let params = QueryParams::new().ids(vec![]).page(2, 5);

    let page = companies.get(&params, Default::default()).await.unwrap();
    assert!(page.is_empty());
    assert_eq!(page.total_count, 0);
    assert_eq!((page.page_number, page.page_size), (2, 5));

    assert_eq!(companies.count(&params, Default::default()).await.unwrap(), 0);
    assert!(!companies.any(&params, Default::default()).await.unwrap());
    assert!(companies
        .exists_many_by(&params, Default::default())
        .await
        .unwrap()
        .is_empty());

    assert!(companies.get(&params, required()).await.unwrap_err().is_not_found());
    assert!(companies.count(&params, required()).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn required_list_reads_fail_when_empty() {
    let store = InMemoryStore::new();
    let companies = repo(&session(&store), Companies);

    assert!(companies.get_all(Default::default()).await.unwrap().is_empty());
    assert!(companies.get_all(required()).await.unwrap_err().is_not_found());
    let err = companies
        .any(&QueryParams::new(), required())
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn soft_deleted_rows_are_filtered_on_request() {
    let store = InMemoryStore::new();
    let session = session(&store);
    let companies = repo(&session, Companies);
    let company = (1..=9).fold(Company::new("Acme"), |c, i| {
        c.with_department(Department::new(&format!("Dept {}", i)))
    });
    let id = companies.create(company).await.unwrap().key_accessor().clone();
    save(&session).await;

    let loaded = companies
        .get_by_id(&id.require().unwrap(), required())
        .await
        .unwrap()
        .unwrap();
    let departments = repo(&session, Departments);
    departments.delete(&loaded.departments[1]).await.unwrap();
    departments.delete(&loaded.departments[4]).await.unwrap();
    save(&session).await;

    let count = |deleted: Option<bool>| {
        let departments = &departments;
        async move {
            departments
                .count(&QueryParams::new().deleted(deleted), Default::default())
                .await
                .unwrap()
        }
    };
    assert_eq!(count(Some(true)).await, 2);
    assert_eq!(count(Some(false)).await, 7);
    assert_eq!(count(None).await, 9);

    let live = departments
        .get(&QueryParams::new().deleted(Some(false)), Default::default())
        .await
        .unwrap();
    assert_eq!(live.total_count, 7);
    assert!(live.results.iter().all(|d| !d.is_deleted));
    assert!(live.results.iter().all(|d| d.name != "Dept 2" && d.name != "Dept 5"));
}

// ============================================================================
// Search, typeahead, sorting and entity filters
// ============================================================================

#[tokio::test]
async fn search_requires_every_token() {
    let store = InMemoryStore::new();
    seed_companies(&store, &["Acme Corp", "Acme Inc", "Globex Corp"]).await;
    let companies = repo(&session(&store), Companies);

    let page = companies
        .get(&QueryParams::new().search("corp  ACME"), Default::default())
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Acme Corp"]);

    let corp = companies
        .count(&QueryParams::new().search("corp"), Default::default())
        .await
        .unwrap();
    assert_eq!(corp, 2);

    let all = companies
        .count(&QueryParams::new().search("   "), Default::default())
        .await
        .unwrap();
    assert_eq!(all, 3);
}

#[tokio::test]
async fn typeahead_matches_prefixes() {
    let store = InMemoryStore::new();
    seed_companies(&store, &["Acme Corp", "Acme Inc", "Globex Corp"]).await;
    let companies = repo(&session(&store), Companies);

    let page = companies
        .get(&QueryParams::new().typeahead("ac"), Default::default())
        .await
        .unwrap();
    assert_eq!(names(&page), vec!["Acme Corp", "Acme Inc"]);
    assert!(companies
        .any(&QueryParams::new().typeahead("glo"), Default::default())
        .await
        .unwrap());
}

#[tokio::test]
async fn unsupported_capabilities_are_not_implemented() {
    let store = InMemoryStore::new();
    let departments = repo(&session(&store), Departments);

    let err = departments
        .get(&QueryParams::new().sort("name", SortDirection::Asc), Default::default())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented());
    assert!(err.to_string().starts_with("Ordering is not supported"));

    let err = departments
        .count(&QueryParams::new().search("x"), Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Searching is not supported.");

    let err = departments
        .any(&QueryParams::new().typeahead("x"), Default::default())
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Typeahead is not supported.");
}

#[tokio::test]
async fn unknown_sort_field_lists_the_supported_ones() {
    let store = InMemoryStore::new();
    let companies = repo(&session(&store), Companies);

    let err = companies
        .get(&QueryParams::new().sort("Color", SortDirection::Asc), Default::default())
        .await
        .unwrap_err();
    match err {
        RepositoryError::NotImplemented { message, supported } => {
            assert_eq!(supported, vec!["Id", "Name"]);
            assert_eq!(
                message,
                "Sorting parameter \"Color\" is not supported!\nSupported parameters: Id, Name"
            );
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn counts_ignore_sorting() {
    let store = InMemoryStore::new();
    seed_numbered(&store, 4).await;
    let companies = repo(&session(&store), Companies);

    let params = QueryParams::new().sort("Color", SortDirection::Asc);
    assert_eq!(companies.count(&params, Default::default()).await.unwrap(), 4);
}

#[tokio::test]
async fn entity_filters_run_before_the_common_stages() {
    let store = InMemoryStore::new();
    let ids = seed_companies(&store, &["Acme Corp", "Acme Inc", "Globex Corp"]).await;
    let companies = repo(&session(&store), Companies);

    let filters = CompanyFilters {
        name: Some(StringPropertyFilter::new("acme", TextMatch::StartsWith).ignoring_case()),
    };
    let params = QueryParams::new()
        .filters(filters)
        .excluding_ids(vec![ids[1]]);
    let page = companies.get(&params, Default::default()).await.unwrap();
    assert_eq!(names(&page), vec!["Acme Corp"]);

    let keys = companies
        .exists_many_by(&params, Default::default())
        .await
        .unwrap();
    assert_eq!(keys, vec![ids[0]]);
}

// ============================================================================
// Projections and access policies
// ============================================================================

async fn seed_people(store: &InMemoryStore) -> Vec<Person> {
    let session = session(store);
    let people = repo(&session, People);
    let all = vec![Person::new("Alice"), Person::new("Bob"), Person::new("Eve")];
    for person in &all {
        people.create(person.clone()).await.unwrap();
    }
    save(&session).await;
    all
}

fn projected_people(session: &Arc<Session>) -> Repository<People> {
    let projections =
        Projections::new().register::<Person, PersonSummary>(|p: &Person| PersonSummary::from(p));
    Repository::new(
        session.clone(),
        People,
        RepositoryDependencies::default().with_projections(projections),
    )
}

#[tokio::test]
async fn projections_map_pages_and_single_reads() {
    let store = InMemoryStore::new();
    let all = seed_people(&store).await;
    let people = projected_people(&session(&store));

    let page = people
        .get_projected::<PersonSummary>(&QueryParams::new().page(1, 2), Default::default())
        .await
        .unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.len(), 2);

    let alice = people
        .get_by_id_projected::<PersonSummary>(&all[0].id, required())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alice.label, "Alice <alice@example.com>");

    let missing = people
        .get_by_id_projected::<PersonSummary>(&Uuid::new_v4(), Default::default())
        .await
        .unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn autocomplete_pages_projected_rows() {
    let store = InMemoryStore::new();
    seed_people(&store).await;
    let people = projected_people(&session(&store));

    let page = people
        .autocomplete::<PersonSummary>(&QueryParams::new().page(1, 1), Default::default())
        .await
        .unwrap();
    assert_eq!(page.total_count, 3);
    assert_eq!(page.results.len(), 1);
    assert!(page.results[0].label.ends_with("@example.com>"));
}

#[tokio::test]
async fn unregistered_projection_is_not_implemented() {
    let store = InMemoryStore::new();
    seed_people(&store).await;
    let people = repo(&session(&store), People);

    let err = people
        .get_projected::<PersonSummary>(&QueryParams::new(), Default::default())
        .await
        .unwrap_err();
    assert!(err.is_not_implemented());
    assert!(err
        .to_string()
        .starts_with("Projections are not available for repository of Person."));
}

#[tokio::test]
async fn access_policy_narrows_reads() {
    let store = InMemoryStore::new();
    seed_people(&store).await;
    let people = repo(&session(&store), People);

    let restricted = RepositoryQueryOptions::default().with_access_policy(AccessPolicy::default());
    let visible = people.get_all(restricted).await.unwrap();
    let mut visible: Vec<_> = visible.into_iter().map(|p| p.name).collect();
    visible.sort();
    assert_eq!(visible, vec!["Alice", "Eve"]);

    let full = RepositoryQueryOptions::<AccessPolicy>::default().with_full_access();
    assert_eq!(people.get_all(full).await.unwrap().len(), 3);
    assert_eq!(people.get_all(Default::default()).await.unwrap().len(), 3);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test]
async fn cancelled_session_rejects_reads() {
    let store = InMemoryStore::new();
    seed_numbered(&store, 2).await;
    let token = CancellationToken::new();
    let session = Arc::new(
        Session::new(support::model(), Arc::new(store.clone())).with_cancellation(token.clone()),
    );
    let companies = repo(&session, Companies);
    assert_eq!(companies.get_all(Default::default()).await.unwrap().len(), 2);

    token.cancel();
    let err = companies.get_all(Default::default()).await.unwrap_err();
    assert!(matches!(err, RepositoryError::Cancelled));
}

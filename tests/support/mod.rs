//! Shared fixtures: a company aggregate (departments, teams, members), a
//! standalone person entity, and the repositories over them.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use generic_repo::query::{contains_ignore_case, starts_with_ignore_case};
use generic_repo::{
    AccessPolicy, Entity, EntityType, Filter, InMemoryStore, Includes, Model, Query,
    RepositoryConfig, RepositoryError, Session, SortFields, Sorting, StringPropertyFilter,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
#[entity(table = "companies")]
pub struct Company {
    #[entity(key, generated)]
    pub id: i64,
    pub name: String,
    #[entity(tenant)]
    #[serde(default)]
    pub tenant_id: Uuid,
    #[entity(version)]
    #[serde(default)]
    pub row_version: u64,
    #[entity(created_at)]
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[entity(created_by)]
    #[serde(default)]
    pub created_by: Option<Uuid>,
    #[entity(modified_at)]
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[entity(modified_by)]
    #[serde(default)]
    pub modified_by: Option<Uuid>,
    #[entity(navigation(fk(company_id = id)))]
    #[serde(default)]
    pub departments: Vec<Department>,
}

impl Company {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            name: name.to_string(),
            tenant_id: Uuid::nil(),
            row_version: 0,
            created_at: None,
            created_by: None,
            modified_at: None,
            modified_by: None,
            departments: Vec::new(),
        }
    }

    pub fn with_department(mut self, department: Department) -> Self {
        self.departments.push(department);
        self
    }

    pub fn department(&self, name: &str) -> Option<&Department> {
        self.departments.iter().find(|d| d.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Department {
    #[entity(key, generated)]
    pub id: i64,
    #[serde(default)]
    pub company_id: i64,
    pub name: String,
    #[entity(soft_delete)]
    #[serde(default)]
    pub is_deleted: bool,
    #[entity(deleted_at)]
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[entity(deleted_by)]
    #[serde(default)]
    pub deleted_by: Option<Uuid>,
    #[entity(navigation(fk(department_id = id)))]
    #[serde(default)]
    pub teams: Vec<Team>,
}

impl Department {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            company_id: 0,
            name: name.to_string(),
            is_deleted: false,
            deleted_at: None,
            deleted_by: None,
            teams: Vec::new(),
        }
    }

    pub fn with_team(mut self, team: Team) -> Self {
        self.teams.push(team);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Team {
    #[entity(key, generated)]
    pub id: i64,
    #[serde(default)]
    pub department_id: i64,
    #[serde(rename = "title")]
    pub name: String,
    #[entity(navigation(fk(team_id = id)))]
    #[serde(default)]
    pub members: Vec<TeamMember>,
}

impl Team {
    pub fn new(name: &str) -> Self {
        Self {
            id: 0,
            department_id: 0,
            name: name.to_string(),
            members: Vec::new(),
        }
    }

    pub fn with_member(mut self, person_id: Uuid, role: &str) -> Self {
        self.members.push(TeamMember {
            team_id: 0,
            person_id,
            role: role.to_string(),
        });
        self
    }
}

/// Keyed by `(team_id, person_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TeamMember {
    #[serde(default)]
    pub team_id: i64,
    pub person_id: Uuid,
    pub role: String,
}

impl Entity for TeamMember {
    const TABLE: &'static str = "team_members";

    type Key = (i64, Uuid);

    fn key(&self) -> (i64, Uuid) {
        (self.team_id, self.person_id)
    }

    fn describe() -> EntityType {
        EntityType::builder(Self::TABLE, "TeamMember")
            .key(&["team_id", "person_id"])
            .build()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Person {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

impl Person {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            email: format!("{}@example.com", name.to_lowercase()),
        }
    }
}

/// Serialized as `invoiceNo`; lines link to it under that name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct Invoice {
    #[entity(key, generated)]
    #[serde(rename = "invoiceNo")]
    pub number: i64,
    pub customer: String,
    #[entity(navigation(fk(invoiceNo = number)))]
    #[serde(default)]
    pub lines: Vec<InvoiceLine>,
}

impl Invoice {
    pub fn new(customer: &str) -> Self {
        Self {
            number: 0,
            customer: customer.to_string(),
            lines: Vec::new(),
        }
    }

    pub fn with_line(mut self, text: &str) -> Self {
        self.lines.push(InvoiceLine {
            id: 0,
            invoice_no: 0,
            text: text.to_string(),
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Entity)]
pub struct InvoiceLine {
    #[entity(key, generated)]
    pub id: i64,
    #[serde(default, rename = "invoiceNo")]
    pub invoice_no: i64,
    pub text: String,
}

/// Projection target for [`Person`].
#[derive(Debug, Clone, PartialEq)]
pub struct PersonSummary {
    pub id: Uuid,
    pub label: String,
}

impl From<&Person> for PersonSummary {
    fn from(person: &Person) -> Self {
        Self {
            id: person.id,
            label: format!("{} <{}>", person.name, person.email),
        }
    }
}

// ============================================================================
// Repositories
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompanyFilters {
    pub name: Option<StringPropertyFilter>,
}

pub struct Companies;

impl RepositoryConfig for Companies {
    type Entity = Company;
    type Filters = CompanyFilters;
    type Policy = AccessPolicy;

    fn owned_includes(&self) -> Includes {
        Includes::new().path("departments.teams.members")
    }

    fn search(&self) -> Option<generic_repo::query::TextPredicate<Company>> {
        Some(Arc::new(|token: &str| {
            let token = token.to_string();
            Filter::predicate(move |c: &Company| contains_ignore_case(&c.name, &token))
        }))
    }

    fn typeahead(&self) -> Option<generic_repo::query::TextPredicate<Company>> {
        Some(Arc::new(|prefix: &str| {
            let prefix = prefix.to_string();
            Filter::predicate(move |c: &Company| starts_with_ignore_case(&c.name, &prefix))
        }))
    }

    fn sorting(&self) -> Sorting<Company> {
        Sorting::AllowList(
            SortFields::new()
                .field("Name", |c: &Company| c.name.clone())
                .field("Id", |c: &Company| c.id),
        )
    }

    fn apply_filters(
        &self,
        query: Query<Company>,
        filters: &CompanyFilters,
    ) -> Result<Query<Company>, RepositoryError> {
        Ok(match &filters.name {
            Some(name) => query.filter(name.to_filter(|c: &Company| c.name.clone())),
            None => query,
        })
    }
}

pub struct Departments;

impl RepositoryConfig for Departments {
    type Entity = Department;
    type Filters = ();
    type Policy = AccessPolicy;

    fn owned_includes(&self) -> Includes {
        Includes::new().path("teams.members")
    }
}

pub struct TeamMembers;

impl RepositoryConfig for TeamMembers {
    type Entity = TeamMember;
    type Filters = ();
    type Policy = AccessPolicy;
}

/// Only people whose name starts with a vowel unless the caller has full access.
pub struct People;

impl RepositoryConfig for People {
    type Entity = Person;
    type Filters = ();
    type Policy = AccessPolicy;

    fn apply_access_policy(&self, query: Query<Person>, policy: &AccessPolicy) -> Query<Person> {
        if policy.full_access {
            query
        } else {
            query.filter(Filter::predicate(|p: &Person| {
                p.name.starts_with(|c: char| "AEIOU".contains(c))
            }))
        }
    }
}

pub struct Invoices;

impl RepositoryConfig for Invoices {
    type Entity = Invoice;
    type Filters = ();
    type Policy = AccessPolicy;

    fn owned_includes(&self) -> Includes {
        Includes::new().path("lines")
    }
}

// ============================================================================
// Wiring
// ============================================================================

pub fn model() -> Arc<Model> {
    Arc::new(
        Model::builder()
            .register::<Company>()
            .register::<Department>()
            .register::<Team>()
            .register::<TeamMember>()
            .register::<Person>()
            .register::<Invoice>()
            .register::<InvoiceLine>()
            .build()
            .unwrap(),
    )
}

pub fn session(store: &InMemoryStore) -> Arc<Session> {
    Arc::new(Session::new(model(), Arc::new(store.clone())))
}

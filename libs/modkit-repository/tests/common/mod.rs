#![allow(clippy::unwrap_used, clippy::expect_used)]
#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use modkit_repository::{DbContext, EntityDescriptor, GenericRepository, apply_migrations};
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::prelude::*;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

pub const SCOPE: &str = "repository_tests";

/// Customers carry the identity contract and can be upserted.
pub mod customer {
    use modkit_repository::EntityModel;
    use sea_orm::ActiveValue;
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "customers")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub name: String,
        pub email: Option<String>,
        pub created_on: DateTimeUtc,
        pub created_by: String,
        pub active: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    #[async_trait::async_trait]
    impl ActiveModelBehavior for ActiveModel {
        async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
        where
            C: ConnectionTrait,
        {
            if insert && matches!(&self.id, ActiveValue::Set(id) if id.is_nil()) {
                self.id = ActiveValue::Set(Uuid::new_v4());
            }
            Ok(self)
        }
    }

    impl EntityModel for Model {
        fn id(&self) -> Uuid {
            self.id
        }

        fn created_on(&self) -> DateTimeUtc {
            self.created_on
        }

        fn created_by(&self) -> &str {
            &self.created_by
        }

        fn active(&self) -> bool {
            self.active
        }
    }
}

/// Tags have a store-generated integer key and no identity contract.
pub mod tag {
    use sea_orm::entity::prelude::*;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
    #[sea_orm(table_name = "tags")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,
        pub label: String,
        pub weight: i32,
        pub archived: bool,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

#[derive(DeriveIden)]
enum Customers {
    Table,
    Id,
    Name,
    Email,
    CreatedOn,
    CreatedBy,
    Active,
}

#[derive(DeriveIden)]
enum Tags {
    Table,
    Id,
    Label,
    Weight,
    Archived,
}

pub struct CreateCustomers;

impl MigrationName for CreateCustomers {
    fn name(&self) -> &str {
        "m0001_create_customers"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateCustomers {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Customers::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Customers::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(Customers::Name).string().not_null())
                    .col(ColumnDef::new(Customers::Email).string())
                    .col(
                        ColumnDef::new(Customers::CreatedOn)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Customers::CreatedBy).string().not_null())
                    .col(ColumnDef::new(Customers::Active).boolean().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Customers::Table).to_owned())
            .await
    }
}

pub struct CreateTags;

impl MigrationName for CreateTags {
    fn name(&self) -> &str {
        "m0002_create_tags"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for CreateTags {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Tags::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Tags::Id)
                            .integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Tags::Label).string().not_null())
                    .col(ColumnDef::new(Tags::Weight).integer().not_null())
                    .col(ColumnDef::new(Tags::Archived).boolean().not_null())
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Tags::Table).to_owned())
            .await
    }
}

#[must_use]
pub fn migrations() -> Vec<Box<dyn MigrationTrait>> {
    vec![Box::new(CreateCustomers), Box::new(CreateTags)]
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Single-connection in-memory database with the test schema applied.
pub async fn memory_context() -> Arc<DbContext> {
    init_tracing();
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let conn = Database::connect(opts)
        .await
        .expect("Failed to connect to database");
    let ctx = Arc::new(DbContext::new(conn));
    apply_migrations(&ctx, SCOPE, migrations())
        .await
        .expect("Failed to apply migrations");
    ctx
}

#[must_use]
pub fn fixed_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
}

/// Unsaved customer (nil identifier).
#[must_use]
pub fn new_customer(name: &str) -> customer::Model {
    customer::Model {
        id: Uuid::nil(),
        name: name.to_owned(),
        email: None,
        created_on: fixed_time(),
        created_by: "tests".to_owned(),
        active: true,
    }
}

#[must_use]
pub fn new_tag(label: &str, weight: i32) -> tag::Model {
    tag::Model {
        id: 0,
        label: label.to_owned(),
        weight,
        archived: false,
    }
}

#[must_use]
pub fn customers(ctx: &Arc<DbContext>) -> GenericRepository<customer::Entity> {
    GenericRepository::new(Arc::clone(ctx), EntityDescriptor::new().with_identity())
}

#[must_use]
pub fn tags(ctx: &Arc<DbContext>) -> GenericRepository<tag::Entity> {
    GenericRepository::new(Arc::clone(ctx), EntityDescriptor::new())
}

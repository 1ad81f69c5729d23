use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240301_000001_create_ticket_types_table::Migration),
            Box::new(m20240301_000002_create_purchases_table::Migration),
            Box::new(m20240301_000003_create_payments_table::Migration),
            Box::new(m20240301_000004_create_tickets_table::Migration),
            Box::new(m20240301_000005_create_listings_table::Migration),
            Box::new(m20240301_000006_create_transfer_records_table::Migration),
            Box::new(m20240301_000007_create_promotions_table::Migration),
        ]
    }
}

// Migration implementations

mod m20240301_000001_create_ticket_types_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000001_create_ticket_types_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TicketTypes::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TicketTypes::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TicketTypes::EventId).uuid().not_null())
                        .col(ColumnDef::new(TicketTypes::Name).string().not_null())
                        .col(
                            ColumnDef::new(TicketTypes::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::QuantityAvailable)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::SoldQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::MinPerOrder)
                                .integer()
                                .not_null()
                                .default(1),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::MaxPerOrder)
                                .integer()
                                .not_null()
                                .default(10),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::EventStartsAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TicketTypes::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TicketTypes::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_ticket_types_event")
                        .table(TicketTypes::Table)
                        .col(TicketTypes::EventId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TicketTypes::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum TicketTypes {
        Table,
        Id,
        EventId,
        Name,
        Price,
        QuantityAvailable,
        SoldQuantity,
        MinPerOrder,
        MaxPerOrder,
        Active,
        EventStartsAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000002_create_purchases_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000002_create_purchases_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Purchases::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Purchases::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Purchases::UserId).uuid().not_null())
                        .col(ColumnDef::new(Purchases::EventId).uuid().not_null())
                        .col(
                            ColumnDef::new(Purchases::Status)
                                .string_len(32)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Purchases::TotalAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Purchases::DiscountAmount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Purchases::PromotionId).uuid().null())
                        .col(ColumnDef::new(Purchases::PaymentId).uuid().null())
                        .col(ColumnDef::new(Purchases::LineItems).text().not_null())
                        .col(ColumnDef::new(Purchases::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Purchases::PaidAt).timestamp().null())
                        .col(ColumnDef::new(Purchases::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_purchases_user")
                        .table(Purchases::Table)
                        .col(Purchases::UserId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Purchases::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Purchases {
        Table,
        Id,
        UserId,
        EventId,
        Status,
        TotalAmount,
        DiscountAmount,
        PromotionId,
        PaymentId,
        LineItems,
        CreatedAt,
        PaidAt,
        UpdatedAt,
    }
}

mod m20240301_000003_create_payments_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000003_create_payments_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Payments::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Payments::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Payments::OwnerUserId).uuid().not_null())
                        .col(
                            ColumnDef::new(Payments::Amount)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Payments::Method).string().null())
                        // The durable idempotency key: two deliveries of the same
                        // gateway notification cannot both insert.
                        .col(
                            ColumnDef::new(Payments::ExternalTransactionId)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Payments::ExternalReference)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Payments::Status)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(ColumnDef::new(Payments::PaidAt).timestamp().not_null())
                        .col(ColumnDef::new(Payments::CreatedAt).timestamp().not_null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Payments::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Payments {
        Table,
        Id,
        OwnerUserId,
        Amount,
        Method,
        ExternalTransactionId,
        ExternalReference,
        Status,
        PaidAt,
        CreatedAt,
    }
}

mod m20240301_000004_create_tickets_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000004_create_tickets_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Tickets::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Tickets::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Tickets::OwnerUserId).uuid().not_null())
                        .col(ColumnDef::new(Tickets::EventId).uuid().not_null())
                        .col(ColumnDef::new(Tickets::TicketTypeId).uuid().not_null())
                        .col(ColumnDef::new(Tickets::PurchaseId).uuid().null())
                        .col(ColumnDef::new(Tickets::PaymentId).uuid().not_null())
                        .col(
                            ColumnDef::new(Tickets::Price)
                                .decimal()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(Tickets::Credential)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Tickets::Valid)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Tickets::Status)
                                .string_len(32)
                                .not_null()
                                .default("active"),
                        )
                        .col(ColumnDef::new(Tickets::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Tickets::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_tickets_owner")
                        .table(Tickets::Table)
                        .col(Tickets::OwnerUserId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_tickets_purchase")
                        .table(Tickets::Table)
                        .col(Tickets::PurchaseId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Tickets::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Tickets {
        Table,
        Id,
        OwnerUserId,
        EventId,
        TicketTypeId,
        PurchaseId,
        PaymentId,
        Price,
        Credential,
        Valid,
        Status,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000005_create_listings_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000005_create_listings_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Listings::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Listings::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Listings::TicketId).uuid().not_null())
                        .col(ColumnDef::new(Listings::SellerId).uuid().not_null())
                        .col(ColumnDef::new(Listings::BuyerId).uuid().null())
                        .col(ColumnDef::new(Listings::Price).decimal().not_null())
                        .col(ColumnDef::new(Listings::PlatformFee).decimal().null())
                        .col(ColumnDef::new(Listings::SellerProceeds).decimal().null())
                        .col(
                            ColumnDef::new(Listings::Status)
                                .string_len(32)
                                .not_null()
                                .default("active"),
                        )
                        .col(ColumnDef::new(Listings::ExpiresAt).timestamp().not_null())
                        .col(ColumnDef::new(Listings::SoldAt).timestamp().null())
                        .col(ColumnDef::new(Listings::CreatedAt).timestamp().not_null())
                        .col(ColumnDef::new(Listings::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await?;

            // Partial unique index: at most one active listing per ticket,
            // enforced by the store so concurrent creates cannot both win.
            // Supported by both PostgreSQL and SQLite.
            manager
                .get_connection()
                .execute_unprepared(
                    "CREATE UNIQUE INDEX IF NOT EXISTS idx_listings_active_ticket \
                     ON listings (ticket_id) WHERE status = 'active'",
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Listings::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Listings {
        Table,
        Id,
        TicketId,
        SellerId,
        BuyerId,
        Price,
        PlatformFee,
        SellerProceeds,
        Status,
        ExpiresAt,
        SoldAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20240301_000006_create_transfer_records_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000006_create_transfer_records_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(TransferRecords::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(TransferRecords::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferRecords::TicketId).uuid().not_null())
                        .col(
                            ColumnDef::new(TransferRecords::NewTicketId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRecords::FromUserId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(TransferRecords::ToUserId).uuid().not_null())
                        .col(
                            ColumnDef::new(TransferRecords::OldCredential)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRecords::NewCredential)
                                .string()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(TransferRecords::TransferredAt)
                                .timestamp()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_transfer_records_ticket")
                        .table(TransferRecords::Table)
                        .col(TransferRecords::TicketId)
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(TransferRecords::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum TransferRecords {
        Table,
        Id,
        TicketId,
        NewTicketId,
        FromUserId,
        ToUserId,
        OldCredential,
        NewCredential,
        TransferredAt,
    }
}

mod m20240301_000007_create_promotions_table {
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20240301_000007_create_promotions_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Promotions::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(Promotions::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::Code)
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Promotions::Kind)
                                .string_len(32)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Promotions::DiscountValue)
                                .decimal()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::UsageLimit).integer().null())
                        .col(
                            ColumnDef::new(Promotions::UsageCount)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(Promotions::StartsAt).timestamp().not_null())
                        .col(ColumnDef::new(Promotions::EndsAt).timestamp().not_null())
                        .col(
                            ColumnDef::new(Promotions::Active)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Promotions::CreatedAt)
                                .timestamp()
                                .not_null(),
                        )
                        .col(ColumnDef::new(Promotions::UpdatedAt).timestamp().null())
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Promotions::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Promotions {
        Table,
        Id,
        Code,
        Kind,
        DiscountValue,
        UsageLimit,
        UsageCount,
        StartsAt,
        EndsAt,
        Active,
        CreatedAt,
        UpdatedAt,
    }
}

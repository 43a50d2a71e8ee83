pub mod user {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "users")]
    pub struct Model {
        /// Telegram account id, assigned by the platform.
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: i64,

        /// Community-facing UID, drawn from the bounded range minus the
        /// reserved list. Changes only through /changeuid.
        #[sea_orm(unique)]
        pub uid: i32,

        #[sea_orm(column_type = "Text", nullable)]
        pub username: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub first_name: Option<String>,

        pub is_banned: bool,
        pub is_admin: bool,
        pub is_moderator: bool,

        pub last_activity: DateTimeUtc,
        pub message_count: i32,

        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod catalog_post {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "catalog_posts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        /// Shared with rating_posts.catalog_number; the union must stay
        /// collision-free.
        #[sea_orm(unique)]
        pub catalog_number: i32,

        pub user_id: i64,

        #[sea_orm(column_type = "Text")]
        pub category: String,
        #[sea_orm(column_type = "Text")]
        pub name: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub description: Option<String>,
        #[sea_orm(column_type = "Text", nullable)]
        pub media_file_id: Option<String>,

        pub views: i64,
        pub clicks: i64,

        pub is_active: bool,
        pub is_priority: bool,
        pub is_ad: bool,

        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod rating_post {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "rating_posts")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        #[sea_orm(unique)]
        pub catalog_number: i32,

        #[sea_orm(column_type = "Text")]
        pub name: String,
        /// Free text, validated as 3 words of at most 7 chars each.
        #[sea_orm(column_type = "Text")]
        pub about: String,
        /// 'girl' or 'boy'.
        #[sea_orm(column_type = "Text")]
        pub gender: String,
        #[sea_orm(column_type = "Text")]
        pub media_file_id: String,

        pub author_user_id: i64,
        #[sea_orm(column_type = "Text", nullable)]
        pub author_username: Option<String>,

        /// 'pending', 'approved' or 'rejected'.
        #[sea_orm(column_type = "Text")]
        pub status: String,
        #[sea_orm(column_type = "Text", nullable)]
        pub published_link: Option<String>,

        pub total_score: i32,
        pub vote_count: i32,
        pub views: i64,

        pub created_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod rating_vote {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "rating_votes")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        pub rating_post_id: i32,
        pub user_id: i64,

        pub value: i32,

        pub ts: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod cooldown {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "cooldowns")]
    pub struct Model {
        #[sea_orm(primary_key)]
        pub id: i32,

        pub user_id: i64,
        #[sea_orm(column_type = "Text")]
        pub command: String,

        pub expires_at: DateTimeUtc,
    }

    #[derive(Debug, DeriveRelation, EnumIter)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

//! Database schema and migrations for SciMaterials.
//!
//! Every migration is a list of single statements so that it can be executed
//! on any provider. Column types are restricted to the portable subset
//! (`VARCHAR`, `TEXT`, `BIGINT`); flags are stored as `0`/`1` integers,
//! identifiers are UUID strings and timestamps are RFC 3339 strings.

/// Database migrations.
///
/// Each migration is applied in order inside its own transaction.
/// The schema_version table tracks which migrations have been applied.
pub const MIGRATIONS: &[&[&str]] = &[
    // v1: Reference tables
    &[
        "CREATE TABLE users (
            id          VARCHAR(36) NOT NULL PRIMARY KEY,
            name        VARCHAR(255) NOT NULL UNIQUE,
            email       VARCHAR(255),
            created_at  VARCHAR(40) NOT NULL,
            is_deleted  BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE TABLE authors (
            id          VARCHAR(36) NOT NULL PRIMARY KEY,
            name        VARCHAR(255) NOT NULL UNIQUE,
            surname     VARCHAR(255),
            email       VARCHAR(255),
            user_id     VARCHAR(36) REFERENCES users(id),
            is_deleted  BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE TABLE content_types (
            id              VARCHAR(36) NOT NULL PRIMARY KEY,
            name            VARCHAR(255) NOT NULL UNIQUE,
            file_extension  VARCHAR(32),
            is_deleted      BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE TABLE categories (
            id          VARCHAR(36) NOT NULL PRIMARY KEY,
            name        VARCHAR(255) NOT NULL UNIQUE,
            description TEXT,
            parent_id   VARCHAR(36) REFERENCES categories(id),
            created_at  VARCHAR(40) NOT NULL,
            is_deleted  BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE INDEX idx_categories_parent_id ON categories(parent_id)",
        "CREATE TABLE tags (
            id          VARCHAR(36) NOT NULL PRIMARY KEY,
            name        VARCHAR(255) NOT NULL UNIQUE,
            is_deleted  BIGINT NOT NULL DEFAULT 0
        )",
    ],
    // v2: Resources (files, file groups and urls share one table) and associations
    &[
        "CREATE TABLE resources (
            id                    VARCHAR(36) NOT NULL PRIMARY KEY,
            resource_type         VARCHAR(16) NOT NULL,
            title                 VARCHAR(255) NOT NULL,
            description           TEXT,
            author_id             VARCHAR(36) NOT NULL REFERENCES authors(id),
            created_at            VARCHAR(40) NOT NULL,
            size                  BIGINT NOT NULL DEFAULT 0,
            hash                  VARCHAR(128),
            content_type_id       VARCHAR(36) REFERENCES content_types(id),
            file_group_id         VARCHAR(36) REFERENCES resources(id),
            anti_virus_scanned    BIGINT NOT NULL DEFAULT 0,
            anti_virus_scan_date  VARCHAR(40),
            short_link            VARCHAR(255),
            link                  TEXT,
            is_deleted            BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE INDEX idx_resources_type ON resources(resource_type)",
        "CREATE INDEX idx_resources_hash ON resources(hash)",
        "CREATE INDEX idx_resources_author_id ON resources(author_id)",
        "CREATE INDEX idx_resources_file_group_id ON resources(file_group_id)",
        "CREATE TABLE resource_tags (
            resource_id  VARCHAR(36) NOT NULL REFERENCES resources(id),
            tag_id       VARCHAR(36) NOT NULL REFERENCES tags(id),
            is_deleted   BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (resource_id, tag_id)
        )",
        "CREATE TABLE resource_categories (
            resource_id  VARCHAR(36) NOT NULL REFERENCES resources(id),
            category_id  VARCHAR(36) NOT NULL REFERENCES categories(id),
            is_deleted   BIGINT NOT NULL DEFAULT 0,
            PRIMARY KEY (resource_id, category_id)
        )",
    ],
    // v3: Comments and ratings
    &[
        "CREATE TABLE comments (
            id           VARCHAR(36) NOT NULL PRIMARY KEY,
            parent_id    VARCHAR(36) REFERENCES comments(id),
            author_id    VARCHAR(36) NOT NULL REFERENCES authors(id),
            resource_id  VARCHAR(36) NOT NULL REFERENCES resources(id),
            text         TEXT NOT NULL,
            created_at   VARCHAR(40) NOT NULL,
            is_deleted   BIGINT NOT NULL DEFAULT 0
        )",
        "CREATE INDEX idx_comments_resource_id ON comments(resource_id)",
        "CREATE TABLE ratings (
            id           VARCHAR(36) NOT NULL PRIMARY KEY,
            resource_id  VARCHAR(36) NOT NULL REFERENCES resources(id),
            author_id    VARCHAR(36) NOT NULL REFERENCES authors(id),
            score        BIGINT NOT NULL,
            is_deleted   BIGINT NOT NULL DEFAULT 0,
            UNIQUE (resource_id, author_id)
        )",
    ],
    // v4: Short links with an optimistic concurrency token
    &[
        "CREATE TABLE links (
            id              VARCHAR(36) NOT NULL PRIMARY KEY,
            source_address  TEXT NOT NULL,
            hash            VARCHAR(64) NOT NULL UNIQUE,
            access_count    BIGINT NOT NULL DEFAULT 0,
            last_access     VARCHAR(40),
            created_at      VARCHAR(40) NOT NULL,
            row_version     BIGINT NOT NULL DEFAULT 0,
            is_deleted      BIGINT NOT NULL DEFAULT 0
        )",
    ],
];

/// Tables in the order they must be dropped (dependents first).
pub const DROP_ORDER: &[&str] = &[
    "links",
    "ratings",
    "comments",
    "resource_categories",
    "resource_tags",
    "resources",
    "tags",
    "categories",
    "content_types",
    "authors",
    "users",
    "schema_version",
];

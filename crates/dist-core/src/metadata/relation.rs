//! Local relation definitions
//!
//! The host registers each table here before it can be distributed. Only the
//! parts of the definition that affect distribution are modelled.

use serde::{Deserialize, Serialize};

use crate::sql::{qualified_name, quote_ident};

/// Relation ID
pub type RelationId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Regular,
    /// Parent of a partition tree, holds no rows itself
    Partitioned,
    Foreign,
}

impl Default for RelationKind {
    fn default() -> Self {
        Self::Regular
    }
}

/// Column data types relevant to distribution decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Int2,
    Int4,
    Int8,
    Numeric,
    Float8,
    Bool,
    Text,
    Varchar,
    Uuid,
    Date,
    Timestamp,
    Timestamptz,
    Bytea,
    Json,
    Jsonb,
}

impl ColumnType {
    /// Type has a hash function and can be a hash distribution column
    pub fn is_hashable(&self) -> bool {
        !matches!(self, ColumnType::Json)
    }

    /// Type has a btree ordering and can be a range distribution column
    pub fn is_orderable(&self) -> bool {
        !matches!(self, ColumnType::Json)
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            ColumnType::Int2 => "smallint",
            ColumnType::Int4 => "integer",
            ColumnType::Int8 => "bigint",
            ColumnType::Numeric => "numeric",
            ColumnType::Float8 => "double precision",
            ColumnType::Bool => "boolean",
            ColumnType::Text => "text",
            ColumnType::Varchar => "varchar",
            ColumnType::Uuid => "uuid",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
            ColumnType::Timestamptz => "timestamptz",
            ColumnType::Bytea => "bytea",
            ColumnType::Json => "json",
            ColumnType::Jsonb => "jsonb",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.sql_name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
    #[serde(default)]
    pub not_null: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            column_type,
            not_null: false,
        }
    }

    /// Column definition as it appears in CREATE TABLE
    pub fn definition_sql(&self) -> String {
        let mut def = format!("{} {}", quote_ident(&self.name), self.column_type.sql_name());
        if self.not_null {
            def.push_str(" NOT NULL");
        }
        def
    }
}

/// Primary key or unique constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UniqueConstraint {
    pub name: String,
    pub columns: Vec<String>,
    #[serde(default)]
    pub primary_key: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForeignKey {
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_relation: RelationId,
    pub referenced_columns: Vec<String>,
    /// Existing rows were not checked when the constraint was added
    #[serde(default)]
    pub not_validated: bool,
}

/// Local table definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub id: RelationId,
    #[serde(default = "default_schema")]
    pub schema: String,
    pub name: String,
    #[serde(default)]
    pub kind: RelationKind,
    #[serde(default)]
    pub columns: Vec<Column>,
    /// Partitioned parent, when this relation is a partition
    #[serde(default)]
    pub parent: Option<RelationId>,
    /// Direct partitions in attach order
    #[serde(default)]
    pub partitions: Vec<RelationId>,
    /// Partition key of a partitioned table
    #[serde(default)]
    pub partition_column: Option<String>,
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKey>,
    /// Rows currently stored locally
    #[serde(default)]
    pub row_count: u64,
}

impl Relation {
    pub fn new(id: RelationId, name: impl Into<String>) -> Self {
        Self {
            id,
            schema: default_schema(),
            name: name.into(),
            kind: RelationKind::Regular,
            columns: Vec::new(),
            parent: None,
            partitions: Vec::new(),
            partition_column: None,
            unique_constraints: Vec::new(),
            foreign_keys: Vec::new(),
            row_count: 0,
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, column_type: ColumnType) -> Self {
        self.columns.push(Column::new(name, column_type));
        self
    }

    pub fn with_kind(mut self, kind: RelationKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_primary_key(mut self, columns: &[&str]) -> Self {
        self.unique_constraints.push(UniqueConstraint {
            name: format!("{}_pkey", self.name),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            primary_key: true,
        });
        self
    }

    pub fn with_foreign_key(
        mut self,
        columns: &[&str],
        referenced_relation: RelationId,
        referenced_columns: &[&str],
    ) -> Self {
        let name = format!("{}_{}_fkey", self.name, columns.join("_"));
        self.foreign_keys.push(ForeignKey {
            name,
            columns: columns.iter().map(|c| c.to_string()).collect(),
            referenced_relation,
            referenced_columns: referenced_columns.iter().map(|c| c.to_string()).collect(),
            not_validated: false,
        });
        self
    }

    pub fn with_rows(mut self, row_count: u64) -> Self {
        self.row_count = row_count;
        self
    }

    /// Quoted `schema.name`
    pub fn qualified_name(&self) -> String {
        qualified_name(&self.schema, &self.name)
    }

    /// Whether `name` refers to this relation, either bare or schema-qualified
    pub fn matches_name(&self, name: &str) -> bool {
        match name.split_once('.') {
            Some((schema, table)) => schema == self.schema && table == self.name,
            None => name == self.name,
        }
    }

    /// Position and definition of a column by name
    pub fn column(&self, name: &str) -> Option<(usize, &Column)> {
        self.columns.iter().enumerate().find(|(_, c)| c.name == name)
    }

    pub fn is_partitioned(&self) -> bool {
        self.kind == RelationKind::Partitioned
    }

    pub fn is_partition(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_foreign(&self) -> bool {
        self.kind == RelationKind::Foreign
    }

    /// Name of the physical table backing one shard
    pub fn shard_name(&self, shard_id: u64) -> String {
        format!("{}_{}", self.name, shard_id)
    }

    /// Qualified shard table name
    pub fn qualified_shard_name(&self, shard_id: u64) -> String {
        qualified_name(&self.schema, &self.shard_name(shard_id))
    }

    /// Column list for CREATE TABLE
    pub fn columns_sql(&self) -> String {
        self.columns
            .iter()
            .map(Column::definition_sql)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

fn default_schema() -> String {
    "public".to_string()
}

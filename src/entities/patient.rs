//! Patient records, keyed internally by `id` and externally by `patient_id`.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "patients")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    /// Natural key shared across databases (e.g. "P001")
    #[sea_orm(unique, column_type = "String(StringLen::N(50))")]
    pub patient_id: String,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub name: String,
    pub age: i32,
    #[sea_orm(column_type = "String(StringLen::N(20))")]
    pub gender: String,
    #[sea_orm(column_type = "String(StringLen::N(255))")]
    pub medical_condition: String,
    pub last_visit: Date,
    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

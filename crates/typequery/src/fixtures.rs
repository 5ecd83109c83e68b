//! Entities shared by the unit tests.

use crate::entity::{Entity, Record};
use crate::error::OrmResult;
use crate::property::{Association, Property};
use crate::schema::{EntitySchema, FieldMeta, ScalarType};
use crate::value::{FromValue, SqlScalar, Value};
use chrono::{DateTime, NaiveDate, Utc};

pub static STATUS_LABELS: &[&str] = &["NEW", "ACTIVE", "INACTIVE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    New,
    Active,
    Inactive,
}

impl SqlScalar for Status {
    fn into_value(self) -> Value {
        let label = match self {
            Status::New => "NEW",
            Status::Active => "ACTIVE",
            Status::Inactive => "INACTIVE",
        };
        Value::Text(label.to_string())
    }
}

impl FromValue for Status {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value.as_text() {
            Some("NEW") => Ok(Status::New),
            Some("ACTIVE") => Ok(Status::Active),
            Some("INACTIVE") => Ok(Status::Inactive),
            _ => Err(format!("unknown status {value:?}")),
        }
    }
}

pub static CUSTOMER: EntitySchema = EntitySchema {
    name: "Customer",
    table: "customer",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("name", "name", ScalarType::Text),
        FieldMeta::scalar("status", "status", ScalarType::Enum(STATUS_LABELS)),
        FieldMeta::scalar("registered", "registered", ScalarType::Timestamp),
        FieldMeta::scalar("inactive", "inactive", ScalarType::Bool),
        FieldMeta::scalar("deleted", "deleted", ScalarType::Bool),
        FieldMeta::to_many("contacts", "customer_id", contact_schema),
    ],
    primary_key: "id",
    soft_delete: Some("deleted"),
};

pub static CONTACT: EntitySchema = EntitySchema {
    name: "Contact",
    table: "contact",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("firstName", "first_name", ScalarType::Text),
        FieldMeta::scalar("lastName", "last_name", ScalarType::Text),
        FieldMeta::scalar("email", "email", ScalarType::Text),
        FieldMeta::scalar(
            "phoneNumbers",
            "phone_numbers",
            ScalarType::Array(&ScalarType::Text),
        ),
        FieldMeta::to_one("customer", "customer_id", customer_schema),
    ],
    primary_key: "id",
    soft_delete: None,
};

pub static ORDER: EntitySchema = EntitySchema {
    name: "Order",
    table: "orders",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("orderDate", "order_date", ScalarType::Date),
        FieldMeta::to_one("customer", "customer_id", customer_schema),
    ],
    primary_key: "id",
    soft_delete: None,
};

fn customer_schema() -> &'static EntitySchema {
    &CUSTOMER
}

fn contact_schema() -> &'static EntitySchema {
    &CONTACT
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub status: Option<Status>,
    pub contacts: Option<Vec<Contact>>,
}

impl Customer {
    pub fn id() -> Property<Customer, i64> {
        Property::new("id")
    }
    pub fn name() -> Property<Customer, String> {
        Property::new("name")
    }
    pub fn status() -> Property<Customer, Status> {
        Property::new("status")
    }
    pub fn registered() -> Property<Customer, DateTime<Utc>> {
        Property::new("registered")
    }
    pub fn inactive() -> Property<Customer, bool> {
        Property::new("inactive")
    }
    pub fn contacts() -> Association<Customer, Contact> {
        Association::new("contacts")
    }
}

impl Entity for Customer {
    fn schema() -> &'static EntitySchema {
        &CUSTOMER
    }

    fn from_record(record: &Record) -> OrmResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            name: record.try_get::<Option<String>>("name")?.flatten(),
            status: record.try_get::<Option<Status>>("status")?.flatten(),
            contacts: record.many_as("contacts")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: i64,
    pub email: Option<String>,
    pub customer: Option<Box<Customer>>,
}

impl Contact {
    pub fn id() -> Property<Contact, i64> {
        Property::new("id")
    }
    pub fn first_name() -> Property<Contact, String> {
        Property::new("firstName")
    }
    pub fn last_name() -> Property<Contact, String> {
        Property::new("lastName")
    }
    pub fn email() -> Property<Contact, String> {
        Property::new("email")
    }
    pub fn phone_numbers() -> Property<Contact, Vec<String>> {
        Property::new("phoneNumbers")
    }
    pub fn customer() -> Association<Contact, Customer> {
        Association::new("customer")
    }
}

impl Entity for Contact {
    fn schema() -> &'static EntitySchema {
        &CONTACT
    }

    fn from_record(record: &Record) -> OrmResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            email: record.try_get::<Option<String>>("email")?.flatten(),
            customer: record.one_as::<Customer>("customer")?.map(Box::new),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
    pub order_date: Option<NaiveDate>,
}

impl Order {
    pub fn order_date() -> Property<Order, NaiveDate> {
        Property::new("orderDate")
    }
    pub fn customer() -> Association<Order, Customer> {
        Association::new("customer")
    }
}

impl Entity for Order {
    fn schema() -> &'static EntitySchema {
        &ORDER
    }

    fn from_record(record: &Record) -> OrmResult<Self> {
        Ok(Self {
            id: record.get("id")?,
            order_date: record.try_get::<Option<NaiveDate>>("orderDate")?.flatten(),
        })
    }
}

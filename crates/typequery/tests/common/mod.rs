#![allow(dead_code)]

use chrono::{DateTime, NaiveDate, Utc};
use typequery::prelude::*;
use typequery::register_entity;

pub static STATUS_LABELS: &[&str] = &["GOOD", "BAD", "MIDDLING"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerStatus {
    Good,
    Bad,
    Middling,
}

impl SqlScalar for CustomerStatus {
    fn into_value(self) -> Value {
        let label = match self {
            CustomerStatus::Good => "GOOD",
            CustomerStatus::Bad => "BAD",
            CustomerStatus::Middling => "MIDDLING",
        };
        Value::Text(label.to_string())
    }
}

impl FromValue for CustomerStatus {
    fn from_value(value: &Value) -> Result<Self, String> {
        match value.as_text() {
            Some("GOOD") => Ok(CustomerStatus::Good),
            Some("BAD") => Ok(CustomerStatus::Bad),
            Some("MIDDLING") => Ok(CustomerStatus::Middling),
            _ => Err(format!("unknown customer status {value:?}")),
        }
    }
}

pub static CUSTOMER: EntitySchema = EntitySchema {
    name: "Customer",
    table: "be_customer",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("name", "name", ScalarType::Text),
        FieldMeta::scalar("status", "status", ScalarType::Enum(STATUS_LABELS)),
        FieldMeta::scalar("registered", "registered", ScalarType::Date),
        FieldMeta::scalar("deleted", "deleted", ScalarType::Bool),
        FieldMeta::to_many("contacts", "customer_id", contact_schema),
        FieldMeta::to_many("orders", "customer_id", order_schema),
    ],
    primary_key: "id",
    soft_delete: Some("deleted"),
};

pub static CONTACT: EntitySchema = EntitySchema {
    name: "Contact",
    table: "be_contact",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("firstName", "first_name", ScalarType::Text),
        FieldMeta::scalar("email", "email", ScalarType::Text),
        FieldMeta::to_one("customer", "customer_id", customer_schema),
    ],
    primary_key: "id",
    soft_delete: None,
};

pub static ORDER: EntitySchema = EntitySchema {
    name: "Order",
    table: "be_order",
    fields: &[
        FieldMeta::scalar("id", "id", ScalarType::Int),
        FieldMeta::scalar("orderDate", "order_date", ScalarType::Date),
        FieldMeta::scalar("shipDate", "ship_date", ScalarType::Timestamp),
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

fn order_schema() -> &'static EntitySchema {
    &ORDER
}

#[derive(Debug, Clone, PartialEq)]
pub struct Customer {
    pub id: i64,
    pub name: Option<String>,
    pub status: Option<CustomerStatus>,
    pub contacts: Option<Vec<Contact>>,
}

impl Customer {
    pub fn id() -> Property<Customer, i64> {
        Property::new("id")
    }
    pub fn name() -> Property<Customer, String> {
        Property::new("name")
    }
    pub fn status() -> Property<Customer, CustomerStatus> {
        Property::new("status")
    }
    pub fn registered() -> Property<Customer, NaiveDate> {
        Property::new("registered")
    }
    pub fn contacts() -> Association<Customer, Contact> {
        Association::new("contacts")
    }
    pub fn orders() -> Association<Customer, Order> {
        Association::new("orders")
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
            status: record.try_get::<Option<CustomerStatus>>("status")?.flatten(),
            contacts: record.many_as("contacts")?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Contact {
    pub id: i64,
    pub email: Option<String>,
}

impl Contact {
    pub fn first_name() -> Property<Contact, String> {
        Property::new("firstName")
    }
    pub fn email() -> Property<Contact, String> {
        Property::new("email")
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
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub id: i64,
}

impl Order {
    pub fn id() -> Property<Order, i64> {
        Property::new("id")
    }
    pub fn order_date() -> Property<Order, NaiveDate> {
        Property::new("orderDate")
    }
    pub fn ship_date() -> Property<Order, DateTime<Utc>> {
        Property::new("shipDate")
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
        })
    }
}

register_entity!(Customer);
register_entity!(Contact);
register_entity!(Order);

pub type QCustomer = Query<Customer>;

/// A full customer row in select-list order.
pub fn customer_row(id: i64, name: &str, status: CustomerStatus) -> Vec<Value> {
    vec![
        Value::Int(id),
        Value::from(name),
        status.into_value(),
        Value::Null,
        Value::Bool(false),
    ]
}

mod common;

use chrono::NaiveDate;
use common::{Contact, Customer, CustomerStatus, Order, QCustomer, customer_row};
use std::collections::HashMap;
use typequery::mock::MockStorage;
use typequery::{OrmError, Query, SchemaRegistry, Value};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

#[test]
fn registered_schemas_are_consistent() {
    let registry = SchemaRegistry::from_inventory();
    assert!(registry.schema_for("Customer").is_some());
    assert!(registry.schema_for("Order").is_some());
    assert!(registry.validate().is_empty());
}

#[test]
fn date_alias_operators_render_identically() {
    let d = date(2024, 3, 1);
    let sql = |q: Query<Order>| q.generated_sql().unwrap();

    let lt = sql(Query::new().prop(Order::order_date()).lt(d));
    assert_eq!(lt, sql(Query::new().prop(Order::order_date()).less_than(d)));
    assert_eq!(lt, sql(Query::new().prop(Order::order_date()).before(d)));
    assert!(lt.ends_with("where t0.order_date < ?"));

    let gt = sql(Query::new().prop(Order::order_date()).gt(d));
    assert_eq!(gt, sql(Query::new().prop(Order::order_date()).greater_than(d)));
    assert_eq!(gt, sql(Query::new().prop(Order::order_date()).after(d)));

    let le = sql(Query::new().prop(Order::order_date()).le(d));
    assert_eq!(le, sql(Query::new().prop(Order::order_date()).less_or_equal_to(d)));
    let ge = sql(Query::new().prop(Order::order_date()).ge(d));
    assert_eq!(ge, sql(Query::new().prop(Order::order_date()).greater_or_equal_to(d)));
}

#[test]
fn compiling_twice_is_byte_identical() {
    let build = || {
        Query::<Customer>::new()
            .prop(Customer::name())
            .istarts_with("rob")
            .or()
            .prop(Customer::status())
            .eq(CustomerStatus::Good)
            .assoc(Customer::orders())
            .prop(Order::order_date())
            .after(date(2024, 1, 1))
            .end_or()
            .order_by_desc(Customer::registered())
            .set_max_rows(10)
    };

    let query = build();
    let first = query.compile().unwrap();
    let second = query.compile().unwrap();
    assert_eq!(first.sql(), second.sql());
    assert_eq!(first.params(), second.params());

    let other = build().compile().unwrap();
    assert_eq!(first.sql(), other.sql());
    assert_eq!(first.params(), other.params());
}

#[tokio::test]
async fn find_ids_matches_find_map_size() {
    let storage = MockStorage::new()
        .on(
            "select t0.id from be_customer t0 where",
            vec![vec![Value::Int(1)], vec![Value::Int(4)]],
        )
        .on(
            "from be_customer",
            vec![
                customer_row(1, "Rob", CustomerStatus::Good),
                customer_row(4, "Fiona", CustomerStatus::Bad),
            ],
        );

    let query = Query::<Customer>::new()
        .assoc(Customer::contacts())
        .prop(Contact::first_name())
        .eq("Jim");

    let ids: Vec<i64> = query.find_ids(&storage).await.unwrap();
    let map: HashMap<i64, Customer> = query.find_map(&storage).await.unwrap();
    assert_eq!(ids.len(), map.len());
    for id in ids {
        assert!(map.contains_key(&id));
    }
}

#[tokio::test]
async fn max_rows_bounds_the_result() {
    let storage = MockStorage::new().on(
        "limit 2",
        vec![
            customer_row(1, "Rob", CustomerStatus::Good),
            customer_row(2, "Fiona", CustomerStatus::Good),
        ],
    );

    let list = Query::<Customer>::new()
        .set_max_rows(2)
        .find_list(&storage)
        .await
        .unwrap();
    assert!(list.len() <= 2);
    assert!(storage.executed_sql()[0].ends_with("limit 2"));
}

#[test]
fn relation_emptiness_predicates_are_complementary() {
    let empty = Query::<Customer>::new()
        .assoc(Customer::orders())
        .is_empty()
        .generated_sql()
        .unwrap();
    let not_empty = Query::<Customer>::new()
        .assoc(Customer::orders())
        .is_not_empty()
        .generated_sql()
        .unwrap();

    let subquery = "exists (select 1 from be_order x where x.customer_id = t0.id)";
    assert!(empty.contains(&format!("where not {subquery}")));
    assert!(not_empty.contains(&format!("where {subquery}")));
}

#[test]
fn soft_deleted_targets_are_hidden_from_joins_and_subqueries() {
    let fetched = Query::<Order>::new()
        .fetch_all(Order::customer())
        .generated_sql()
        .unwrap();
    assert!(fetched.ends_with(
        "left join be_customer t1 on t1.id = t0.customer_id and t1.deleted = false"
    ));

    let filtered = Query::<Order>::new()
        .assoc(Order::customer())
        .prop(Customer::name())
        .eq("Rob")
        .generated_sql()
        .unwrap();
    assert!(filtered.contains("join be_customer t1 on t1.id = t0.customer_id and t1.deleted = false"));

    let orphaned = Query::<Order>::new()
        .assoc(Order::customer())
        .is_empty()
        .generated_sql()
        .unwrap();
    assert!(orphaned.ends_with(
        "where not exists (select 1 from be_customer x where x.id = t0.customer_id \
         and x.deleted = false)"
    ));
}

#[tokio::test]
async fn ordered_ids_with_to_many_predicate_are_not_distinct() {
    let storage = MockStorage::new().on("from be_customer", vec![vec![Value::Int(3)]]);
    let ids: Vec<i64> = Query::<Customer>::new()
        .assoc(Customer::contacts())
        .prop(Contact::email())
        .eq("a@b.com")
        .order_by_desc(Customer::registered())
        .find_ids(&storage)
        .await
        .unwrap();
    assert_eq!(ids, vec![3]);
    assert_eq!(
        storage.executed_sql()[0],
        "select t0.id from be_customer t0 where t0.id in (select t0.id from be_customer t0 \
         join be_contact t1 on t1.customer_id = t0.id where t1.email = ?) \
         and t0.deleted = false order by t0.registered desc"
    );
}

#[tokio::test]
async fn find_one_cardinality() {
    let by_id = |id: i64| QCustomer::new().set_id(id);

    let storage = MockStorage::new()
        .on("from be_customer", vec![customer_row(1, "Rob", CustomerStatus::Good)]);
    let rob = by_id(1).find_one(&storage).await.unwrap();
    assert_eq!(rob.name.as_deref(), Some("Rob"));

    let storage = MockStorage::new();
    let err = by_id(999).find_one(&storage).await.unwrap_err();
    assert!(err.is_not_found());
    assert!(by_id(999).find_one_or_empty(&storage).await.unwrap().is_none());

    let storage = MockStorage::new().on(
        "from be_customer",
        vec![
            customer_row(1, "Rob", CustomerStatus::Good),
            customer_row(2, "Rob", CustomerStatus::Good),
        ],
    );
    let err = Query::<Customer>::new()
        .prop(Customer::name())
        .eq("Rob")
        .find_one(&storage)
        .await
        .unwrap_err();
    assert!(err.is_too_many_rows());
}

#[tokio::test]
async fn status_filter_finds_saved_customer() {
    let storage = MockStorage::new().on(
        "where t0.status = ?",
        vec![vec![Value::Int(42)]],
    );

    let ids: Vec<i64> = Query::<Customer>::new()
        .prop(Customer::status())
        .eq(CustomerStatus::Good)
        .find_ids(&storage)
        .await
        .unwrap();
    assert!(ids.contains(&42));

    let stmt = &storage.executed()[0];
    assert_eq!(
        stmt.sql,
        "select t0.id from be_customer t0 where t0.status = ? and t0.deleted = false"
    );
    assert_eq!(stmt.params, vec![Value::from("GOOD")]);
}

#[test]
fn in_list_and_is_in_are_the_same_predicate() {
    let a = Query::<Customer>::new()
        .prop(Customer::id())
        .in_list([1, 2, 3])
        .compile()
        .unwrap();
    let b = Query::<Customer>::new()
        .prop(Customer::id())
        .is_in([1, 2, 3])
        .compile()
        .unwrap();

    assert_eq!(a.sql(), b.sql());
    assert!(a.sql().contains("t0.id in (?,?,?)"));
    assert_eq!(a.params(), &[Value::Int(1), Value::Int(2), Value::Int(3)]);
    assert_eq!(a.params(), b.params());
}

#[tokio::test]
async fn iterator_close_releases_and_rejects_next() {
    let storage = MockStorage::new().on(
        "from be_customer",
        vec![
            customer_row(1, "Rob", CustomerStatus::Good),
            customer_row(2, "Fiona", CustomerStatus::Middling),
        ],
    );

    let mut iter = Query::<Customer>::new()
        .order_by_asc(Customer::id())
        .find_iterate(&storage)
        .await
        .unwrap();

    let mut names = Vec::new();
    while let Some(c) = iter.next().await.unwrap() {
        names.extend(c.name);
    }
    iter.close();

    assert_eq!(names, vec!["Rob".to_string(), "Fiona".to_string()]);
    assert!(matches!(iter.next().await, Err(OrmError::IteratorClosed)));
    assert_eq!(storage.tracker().open_cursors(), 0);
    assert_eq!(storage.tracker().leaked(), 0);
}

#[tokio::test]
async fn nowait_on_locked_row_fails() {
    let storage = MockStorage::new()
        .with_transaction()
        .on_lock_conflict("from be_customer")
        .on("from be_customer", vec![customer_row(1, "Rob", CustomerStatus::Good)]);

    let err = Query::<Customer>::new()
        .set_id(1)
        .for_update_no_wait()
        .find_one(&storage)
        .await
        .unwrap_err();
    assert!(err.is_lock_unavailable());
    assert!(storage.executed_sql()[0].ends_with("for update nowait"));
}

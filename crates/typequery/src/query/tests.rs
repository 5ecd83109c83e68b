use super::*;
use crate::error::OrmError;
use crate::fixtures::{Contact, Customer, Status};
use crate::mock::MockStorage;
use std::collections::HashMap;

fn customer_row(id: i64, name: &str) -> Vec<Value> {
    vec![
        Value::Int(id),
        Value::from(name),
        Value::from("ACTIVE"),
        Value::Null,
        Value::Bool(false),
        Value::Bool(false),
    ]
}

fn contact_row(id: i64, email: &str, customer_id: i64) -> Vec<Value> {
    vec![Value::Int(id), Value::from(email), Value::Int(customer_id)]
}

fn customers() -> Query<Customer> {
    Query::new()
}

#[tokio::test]
async fn find_list_maps_rows_to_entities() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "Rob"), customer_row(2, "Ann")],
    );

    let list = customers()
        .prop(Customer::status())
        .eq(Status::Active)
        .find_list(&storage)
        .await
        .unwrap();

    assert_eq!(list.len(), 2);
    assert_eq!(list[0].name.as_deref(), Some("Rob"));
    assert_eq!(list[1].status, Some(Status::Active));
    assert_eq!(list[0].contacts, None);

    let [stmt]: [crate::mock::ExecutedStatement; 1] = storage.executed().try_into().unwrap();
    assert_eq!(stmt.params, vec![Value::from("ACTIVE")]);
    assert!(!stmt.streamed);
}

#[tokio::test]
async fn find_list_on_no_rows_is_empty() {
    let storage = MockStorage::new();
    let list = customers().find_list(&storage).await.unwrap();
    assert!(list.is_empty());
}

#[tokio::test]
async fn to_many_fetch_runs_one_secondary_query() {
    let storage = MockStorage::new()
        .on("from customer", vec![vec![Value::Int(1)], vec![Value::Int(2)]])
        .on(
            "from contact",
            vec![contact_row(10, "a@x.com", 1), contact_row(11, "b@x.com", 1)],
        );

    let list = customers()
        .select([Customer::id()])
        .fetch(Customer::contacts(), [Contact::email()])
        .find_list(&storage)
        .await
        .unwrap();

    let rob = list[0].contacts.as_ref().unwrap();
    assert_eq!(rob.len(), 2);
    assert_eq!(rob[1].email.as_deref(), Some("b@x.com"));
    assert_eq!(list[1].contacts, Some(Vec::new()));

    let sql = storage.executed_sql();
    assert_eq!(sql.len(), 2);
    assert_eq!(
        sql[1],
        "select t0.id, t0.email, t0.customer_id from contact t0 \
         where t0.customer_id in (?,?) order by t0.id"
    );
    assert_eq!(
        storage.executed()[1].params,
        vec![Value::Int(1), Value::Int(2)]
    );
}

#[tokio::test]
async fn secondary_keys_are_bound_in_batches() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
    );

    customers()
        .select([Customer::id()])
        .fetch_all(Customer::contacts())
        .set_fetch_batch_size(2)
        .find_list(&storage)
        .await
        .unwrap();

    let executed = storage.executed();
    assert_eq!(executed.len(), 3);
    assert_eq!(executed[1].params, vec![Value::Int(1), Value::Int(2)]);
    assert_eq!(executed[2].params, vec![Value::Int(3)]);
}

#[tokio::test]
async fn no_secondary_query_without_owners() {
    let storage = MockStorage::new();
    customers()
        .fetch_all(Customer::contacts())
        .find_list(&storage)
        .await
        .unwrap();
    assert_eq!(storage.execution_count(), 1);
}

#[tokio::test]
async fn find_one_requires_exactly_one_row() {
    let none = MockStorage::new();
    assert!(customers().set_id(1).find_one(&none).await.unwrap_err().is_not_found());
    assert_eq!(customers().find_one_or_empty(&none).await.unwrap(), None);

    let one = MockStorage::new().on("from customer", vec![customer_row(1, "Rob")]);
    let rob = customers().set_id(1).find_one(&one).await.unwrap();
    assert_eq!(rob.id, 1);

    let two = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "Rob"), customer_row(2, "Rob")],
    );
    let err = customers()
        .prop(Customer::name())
        .eq("Rob")
        .find_one(&two)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::TooManyRows { expected: 1, got: 2 }));
}

#[tokio::test]
async fn find_ids_and_find_map_agree() {
    let storage = MockStorage::new()
        .on("select t0.id from customer t0 where", vec![vec![Value::Int(1)], vec![Value::Int(2)]])
        .on(
            "from customer",
            vec![customer_row(1, "Rob"), customer_row(2, "Ann")],
        );

    let query = customers()
        .assoc(Customer::contacts())
        .prop(Contact::email())
        .ends_with("@x.com");

    let ids: Vec<i64> = query.find_ids(&storage).await.unwrap();
    let map: HashMap<i64, Customer> = query.find_map(&storage).await.unwrap();
    assert_eq!(ids, vec![1, 2]);
    assert_eq!(map.len(), ids.len());
    assert_eq!(map[&2].name.as_deref(), Some("Ann"));
}

#[tokio::test]
async fn find_map_can_key_by_property() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "Rob"), customer_row(2, "Ann")],
    );

    let map: HashMap<String, Customer> = customers()
        .set_map_key(Customer::name())
        .find_map(&storage)
        .await
        .unwrap();
    assert_eq!(map["Ann"].id, 2);
}

#[tokio::test]
async fn single_attribute_list_reads_first_column() {
    let storage = MockStorage::new().on(
        "select t0.name from customer",
        vec![vec![Value::from("Rob")], vec![Value::Null]],
    );

    let names: Vec<Option<String>> = customers()
        .select([Customer::name()])
        .find_single_attribute_list(&storage)
        .await
        .unwrap();
    assert_eq!(names, vec![Some("Rob".to_string()), None]);
}

#[tokio::test]
async fn count_and_exists() {
    let storage = MockStorage::new()
        .on("select count(*)", vec![vec![Value::Int(7)]])
        .on("limit 1", vec![vec![Value::Int(3)]]);

    let query = customers().prop(Customer::inactive()).is_false();
    assert_eq!(query.find_count(&storage).await.unwrap(), 7);
    assert!(query.exists(&storage).await.unwrap());

    let sql = storage.executed_sql();
    assert_eq!(
        sql[1],
        "select t0.id from customer t0 where t0.inactive = ? and t0.deleted = false limit 1"
    );

    let empty = MockStorage::new();
    assert!(!query.exists(&empty).await.unwrap());
    assert_eq!(query.find_count(&empty).await.unwrap(), 0);
}

#[tokio::test]
async fn max_rows_limits_the_statement() {
    let storage = MockStorage::new();
    customers()
        .order_by_asc(Customer::name())
        .set_first_row(20)
        .set_max_rows(10)
        .find_list(&storage)
        .await
        .unwrap();

    assert!(storage.executed_sql()[0].ends_with(" order by t0.name limit 10 offset 20"));
}

#[tokio::test]
async fn iterator_reads_rows_then_releases_cursor() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "a"), customer_row(2, "b"), customer_row(3, "c")],
    );

    let mut iter = customers().find_iterate(&storage).await.unwrap();
    let mut ids = Vec::new();
    while let Some(c) = iter.next().await.unwrap() {
        ids.push(c.id);
    }
    assert_eq!(ids, vec![1, 2, 3]);
    assert_eq!(iter.rows_read(), 3);
    assert!(iter.next().await.unwrap().is_none());

    let tracker = storage.tracker();
    assert_eq!(tracker.opened(), 1);
    assert_eq!(tracker.open_cursors(), 0);
    iter.close();
    assert!(storage.executed()[0].streamed);
}

#[tokio::test]
async fn closed_iterator_rejects_next() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "a"), customer_row(2, "b")],
    );

    let mut iter = customers().find_iterate(&storage).await.unwrap();
    assert!(iter.next().await.unwrap().is_some());
    iter.close();
    iter.close();
    assert!(iter.is_closed());
    assert!(matches!(iter.next().await, Err(OrmError::IteratorClosed)));
    assert_eq!(storage.tracker().closed(), 1);
    assert_eq!(storage.tracker().leaked(), 0);
}

#[tokio::test]
async fn dropped_open_iterator_counts_a_leak() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "a"), customer_row(2, "b")],
    );

    {
        let mut iter = customers().find_iterate(&storage).await.unwrap();
        iter.next().await.unwrap();
    }
    assert_eq!(storage.tracker().leaked(), 1);
    assert_eq!(storage.tracker().open_cursors(), 0);
}

#[tokio::test]
async fn iterator_loads_to_many_per_batch() {
    let storage = MockStorage::new()
        .on(
            "from customer",
            vec![vec![Value::Int(1)], vec![Value::Int(2)], vec![Value::Int(3)]],
        )
        .on(
            "from contact",
            vec![contact_row(10, "a@x.com", 1), contact_row(30, "c@x.com", 3)],
        );

    let mut iter = customers()
        .select([Customer::id()])
        .fetch(Customer::contacts(), [Contact::email()])
        .set_fetch_batch_size(2)
        .find_iterate(&storage)
        .await
        .unwrap();

    let mut seen = Vec::new();
    while let Some(c) = iter.next().await.unwrap() {
        seen.push((c.id, c.contacts.map(|v| v.len()).unwrap_or(0)));
    }
    iter.close();

    // the mock answers every batch with both contacts
    assert_eq!(seen, vec![(1, 1), (2, 0), (3, 1)]);
    assert_eq!(storage.execution_count(), 3);
}

#[tokio::test]
async fn find_each_closes_cursor_on_callback_error() {
    let storage = MockStorage::new().on(
        "from customer",
        vec![customer_row(1, "a"), customer_row(2, "b"), customer_row(3, "c")],
    );

    let mut visited = Vec::new();
    let err = customers()
        .find_each(&storage, |c| {
            visited.push(c.id);
            if c.id == 2 {
                return Err(OrmError::Other("stop".into()));
            }
            Ok(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, OrmError::Other(_)));
    assert_eq!(visited, vec![1, 2]);
    assert_eq!(storage.tracker().closed(), 1);
    assert_eq!(storage.tracker().leaked(), 0);
}

#[tokio::test]
async fn locking_requires_a_transaction() {
    let storage = MockStorage::new();
    let err = customers()
        .set_id(1)
        .for_update()
        .find_list(&storage)
        .await
        .unwrap_err();
    assert!(matches!(err, OrmError::TransactionRequired(_)));
    assert_eq!(storage.execution_count(), 0);

    // counting ignores the lock
    customers().for_update().find_count(&storage).await.unwrap();
}

#[tokio::test]
async fn lock_wait_policies() {
    let storage = MockStorage::new()
        .with_transaction()
        .on_lock_conflict("from customer")
        .on("from customer", vec![customer_row(1, "Rob")]);

    let err = customers()
        .set_id(1)
        .for_update_no_wait()
        .find_one(&storage)
        .await
        .unwrap_err();
    assert!(err.is_lock_unavailable());

    let skipped = customers()
        .for_update_skip_locked()
        .find_list(&storage)
        .await
        .unwrap();
    assert!(skipped.is_empty());

    let waited = customers().for_update().find_list(&storage).await.unwrap();
    assert_eq!(waited.len(), 1);
}

#[tokio::test]
async fn paged_list_fetches_each_part_once() {
    let storage = MockStorage::new()
        .on("select count(", vec![vec![Value::Int(23)]])
        .on(
            "from customer",
            vec![customer_row(11, "k"), customer_row(12, "l")],
        );

    let paged = customers()
        .order_by_asc(Customer::id())
        .set_first_row(10)
        .set_max_rows(5)
        .find_paged_list(&storage)
        .unwrap();

    assert_eq!(paged.list().await.unwrap().len(), 2);
    assert_eq!(paged.list().await.unwrap()[0].id, 11);
    assert_eq!(storage.execution_count(), 1);

    assert_eq!(paged.total_count().await.unwrap(), 23);
    assert_eq!(paged.total_page_count().await.unwrap(), 5);
    assert_eq!(paged.page_index(), 2);
    assert!(paged.has_next().await.unwrap());
    assert!(paged.has_prev());
    assert_eq!(storage.execution_count(), 2);

    assert_eq!(paged.into_list().await.unwrap().len(), 2);
    assert_eq!(storage.execution_count(), 2);
}

#[tokio::test]
async fn paged_list_needs_a_page_size() {
    let storage = MockStorage::new();
    let err = customers().find_paged_list(&storage).err().unwrap();
    assert!(matches!(err, OrmError::Build(BuildError::InvalidUsage(_))));
}

#[tokio::test]
async fn labels_tag_every_statement() {
    let storage = MockStorage::new().on("from customer", vec![vec![Value::Int(1)]]);
    customers()
        .select([Customer::id()])
        .fetch_all(Customer::contacts())
        .set_label("customer-contacts")
        .find_list(&storage)
        .await
        .unwrap();

    let tags: Vec<_> = storage.executed().into_iter().map(|s| s.tag).collect();
    assert_eq!(
        tags,
        vec![
            Some("customer-contacts".to_string()),
            Some("customer-contacts".to_string())
        ]
    );
}

#[tokio::test]
async fn build_errors_stop_execution() {
    let storage = MockStorage::new();
    let err = customers().end_or().find_list(&storage).await.unwrap_err();
    assert!(matches!(err, OrmError::Build(BuildError::InvalidUsage(_))));

    let err = customers()
        .prop_dyn("contacts.nickname")
        .eq(Value::from("x"))
        .find_list(&storage)
        .await
        .unwrap_err();
    assert!(err.is_unknown_field_path());
    assert_eq!(storage.execution_count(), 0);
}

#[test]
fn take_build_error_recovers_the_query() {
    let mut query = customers().end_and().prop(Customer::name()).eq("Rob");
    assert!(query.build_error().is_some());
    assert!(query.take_build_error().is_some());
    assert_eq!(
        query.generated_sql().unwrap(),
        "select t0.id, t0.name, t0.status, t0.registered, t0.inactive, t0.deleted \
         from customer t0 where t0.name = ? and t0.deleted = false"
    );
}

#[test]
fn queries_are_independent_values() {
    let base = customers().prop(Customer::name()).eq("Rob");
    let narrowed = base.clone().prop(Customer::inactive()).is_true();

    assert_eq!(base.compile().unwrap().params().len(), 1);
    assert_eq!(narrowed.compile().unwrap().params().len(), 2);
}

use chrono::{NaiveDate, NaiveDateTime};
use rust_sqlcommand::{
    entity, DataType, Error, Executor, ExecutorConfig, Params, SqlCommand,
    SqliteConnectionString, Value,
};
use std::time::Duration;
use tempfile::NamedTempFile;

#[derive(Debug, Default, Clone, PartialEq)]
struct User {
    id: i64,
    name: String,
    email: String,
    age: Option<i32>,
    joined: Option<NaiveDateTime>,
}

entity!(User {
    id,
    name,
    email,
    age,
    joined => "joined_at",
});

const SCHEMA: &str = r#"
    CREATE TABLE users (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        email TEXT UNIQUE NOT NULL,
        age INTEGER,
        joined_at TEXT
    );
    CREATE INDEX idx_users_email ON users(email);
"#;

// Helper function to create a temporary file-based database with the users table
async fn create_temp_db() -> (Executor, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let connection_string = SqliteConnectionString::new(temp_file.path().to_str().unwrap())
        .with_busy_timeout(Duration::from_secs(5))
        .to_string();
    let executor = Executor::sqlite(ExecutorConfig::new(connection_string));
    executor
        .execute(SqlCommand::text(SCHEMA), None)
        .await
        .unwrap();
    (executor, temp_file)
}

async fn insert_user(executor: &Executor, name: &str, email: &str, age: Option<i32>) {
    let mut params = Params::new()
        .with_input(":name", DataType::VarChar, name)
        .with_input(":email", DataType::VarChar, email)
        .with_input(":age", DataType::Integer, age);
    let outcome = executor
        .execute(
            SqlCommand::text("INSERT INTO users (name, email, age) VALUES (:name, :email, :age)"),
            Some(&mut params),
        )
        .await
        .unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn test_basic_operations() {
    let (executor, _file) = create_temp_db().await;

    insert_user(&executor, "John Doe", "john@example.com", Some(30)).await;

    let mut params = Params::new().with_input("id", DataType::Integer, 1);
    let user = executor
        .execute_single::<User>(
            SqlCommand::text("SELECT id, name, email, age, joined_at FROM users WHERE id = @id"),
            Some(&mut params),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.name, "John Doe");
    assert_eq!(user.email, "john@example.com");
    assert_eq!(user.age, Some(30));
    assert_eq!(user.joined, None);

    let mut params = Params::new()
        .with_input("age", DataType::Integer, 31)
        .with_input("id", DataType::Integer, 1);
    executor
        .execute(
            SqlCommand::text("UPDATE users SET age = ? WHERE id = ?"),
            Some(&mut params),
        )
        .await
        .unwrap();
    let updated_age = executor
        .execute_scalar::<Option<i32>>(SqlCommand::text("SELECT age FROM users WHERE id = 1"), None)
        .await
        .unwrap();
    assert_eq!(updated_age.data, Some(Some(31)));

    executor
        .execute(SqlCommand::text("DELETE FROM users WHERE id = 1"), None)
        .await
        .unwrap();
    let deleted = executor
        .execute_single::<User>(SqlCommand::text("SELECT * FROM users WHERE id = 1"), None)
        .await
        .unwrap();
    assert!(deleted.is_none());
}

#[tokio::test]
async fn test_typed_results_carry_default_envelope() {
    let (executor, _file) = create_temp_db().await;
    insert_user(&executor, "Ana", "ana@example.com", None).await;
    insert_user(&executor, "Luis", "luis@example.com", Some(41)).await;

    let outcome = executor
        .execute_typed::<User>(SqlCommand::text("SELECT * FROM users ORDER BY id"), None)
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "the query has been executed correctly");
    assert_eq!(outcome.code, 0);
    assert!(outcome.bag.is_empty());
    let users = outcome.data.unwrap();
    assert_eq!(users.len(), 2);
    assert_eq!(users[0].age, None);
    assert_eq!(users[1].name, "Luis");
}

#[tokio::test]
async fn test_empty_result_is_empty_list() {
    let (executor, _file) = create_temp_db().await;
    let outcome = executor
        .execute_typed::<User>(SqlCommand::text("SELECT * FROM users"), None)
        .await
        .unwrap();
    assert_eq!(outcome.data, Some(vec![]));

    let object = executor
        .execute_object::<User>(SqlCommand::text("SELECT * FROM users"), None)
        .await
        .unwrap();
    assert!(object.success);
    assert_eq!(object.data, None);
}

#[tokio::test]
async fn test_execute_object_returns_first_row() -> anyhow::Result<()> {
    let (executor, _file) = create_temp_db().await;
    insert_user(&executor, "Ana", "ana@example.com", Some(22)).await;
    insert_user(&executor, "Luis", "luis@example.com", Some(41)).await;

    let outcome = executor
        .execute_object::<User>(
            SqlCommand::text("SELECT * FROM users ORDER BY age DESC"),
            None,
        )
        .await?;
    assert_eq!(outcome.data.map(|u| u.name), Some("Luis".to_string()));
    Ok(())
}

#[tokio::test]
async fn test_timestamps_round_trip() {
    let (executor, _file) = create_temp_db().await;
    let joined = NaiveDate::from_ymd_opt(2023, 11, 5)
        .unwrap()
        .and_hms_opt(9, 15, 0)
        .unwrap();
    let mut params = Params::new()
        .with_input("name", DataType::VarChar, "Eva")
        .with_input("email", DataType::VarChar, "eva@example.com")
        .with_input("joined", DataType::DateTime, joined);
    executor
        .execute(
            SqlCommand::text(
                "INSERT INTO users (name, email, joined_at) VALUES (:name, :email, :joined)",
            ),
            Some(&mut params),
        )
        .await
        .unwrap();

    let user = executor
        .execute_single::<User>(SqlCommand::text("SELECT * FROM users"), None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.joined, Some(joined));
}

#[tokio::test]
async fn test_scalar() {
    let (executor, _file) = create_temp_db().await;
    let outcome = executor
        .execute_scalar::<i64>(SqlCommand::text("select 1+1"), None)
        .await
        .unwrap();
    assert_eq!(outcome.data, Some(2));

    let nothing = executor
        .execute_scalar::<Value>(SqlCommand::text("SELECT name FROM users"), None)
        .await
        .unwrap();
    assert_eq!(nothing.data, Some(Value::Null));

    let err = executor
        .execute_scalar::<i64>(SqlCommand::text("SELECT name FROM users"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConversionFailure { .. }));
}

#[tokio::test]
async fn test_rows_are_streamed_to_callback() {
    let (executor, _file) = create_temp_db().await;
    for (name, email) in [("a", "a@x"), ("b", "b@x"), ("c", "c@x")] {
        insert_user(&executor, name, email, None).await;
    }

    let mut names = Vec::new();
    executor
        .execute_rows(
            SqlCommand::text("SELECT name FROM users ORDER BY name DESC; SELECT 1"),
            None,
            |row| {
                names.push(row.get::<String, _>("NAME")?);
                Ok(())
            },
        )
        .await
        .unwrap();
    assert_eq!(names, vec!["c", "b", "a"]);
}

#[tokio::test]
async fn test_multiple_result_sets() {
    let (executor, _file) = create_temp_db().await;
    let outcome = executor
        .execute_multi(
            SqlCommand::text("SELECT 1; SELECT 2 UNION ALL SELECT 3"),
            None,
            |reader| {
                Box::pin(async move {
                    let first = reader.read_many::<i64>().await?;
                    let second = reader.read_many::<i64>().await?;
                    let exhausted = matches!(
                        reader.read_many::<i64>().await,
                        Err(Error::NoMoreResultSets)
                    );
                    Ok::<_, Error>((first, second, exhausted))
                })
            },
        )
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.data, Some((vec![1], vec![2, 3], true)));
}

#[tokio::test]
async fn test_continuation_error_propagates() {
    let (executor, _file) = create_temp_db().await;
    let err = executor
        .execute_multi::<(), _>(SqlCommand::text("SELECT 1"), None, |_reader| {
            Box::pin(async move { Err::<(), Error>(anyhow::anyhow!("not what I expected").into()) })
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Callback(_)));
}

#[tokio::test]
async fn test_failed_reads_release_the_connection() {
    let (executor, file) = create_temp_db().await;
    // enough rows that the worker is still mid-statement when row 2 fails
    executor
        .execute(
            SqlCommand::text(
                "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 500)
                 INSERT INTO users (name, email, age)
                 SELECT 'u' || x, 'u' || x || '@x', CASE WHEN x = 2 THEN 'viejo' ELSE x END FROM c",
            ),
            None,
        )
        .await
        .unwrap();

    let impatient = Executor::sqlite(ExecutorConfig::new(
        SqliteConnectionString::new(file.path().to_str().unwrap())
            .with_busy_timeout(Duration::ZERO)
            .to_string(),
    ));

    let err = executor
        .execute_typed::<User>(SqlCommand::text("SELECT * FROM users ORDER BY id"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::MappingFailure { column, .. } if column == "age"));
    let written = impatient
        .execute(SqlCommand::text("UPDATE users SET age = 2 WHERE id = 2"), None)
        .await
        .unwrap();
    assert!(written.success);

    let err = executor
        .execute_multi::<(), _>(
            SqlCommand::text("SELECT id FROM users ORDER BY id; SELECT 1"),
            None,
            |_reader| {
                Box::pin(async move { Err::<(), Error>(anyhow::anyhow!("giving up").into()) })
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Callback(_)));
    impatient
        .execute(SqlCommand::text("DELETE FROM users WHERE id > 250"), None)
        .await
        .unwrap();

    let remaining = executor
        .execute_scalar::<i64>(SqlCommand::text("SELECT count(*) FROM users"), None)
        .await
        .unwrap();
    assert_eq!(remaining.data, Some(250));
}

#[tokio::test]
async fn test_timeout_cancels_command() {
    let (executor, _file) = create_temp_db().await;
    let endless = SqlCommand::text(
        "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c) SELECT max(x) FROM c",
    )
    .with_timeout(Duration::from_millis(200));

    let err = executor.execute(endless, None).await.unwrap_err();
    assert!(matches!(err, Error::TimeoutExceeded(t) if t == Duration::from_millis(200)));

    // the executor is still usable afterwards
    let outcome = executor
        .execute_scalar::<i64>(SqlCommand::text("SELECT 7"), None)
        .await
        .unwrap();
    assert_eq!(outcome.data, Some(7));
}

#[tokio::test]
async fn test_connection_failure() {
    let executor = Executor::sqlite(ExecutorConfig::new(
        "Data Source=/nonexistent/dir/ventas.db;Mode=ReadOnly",
    ));
    let err = executor
        .execute(SqlCommand::text("SELECT 1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));

    let executor = Executor::sqlite(ExecutorConfig::new("Data Source=x.db;Pooling=true"));
    let err = executor
        .execute(SqlCommand::text("SELECT 1"), None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ConnectionFailure(_)));
}

#[tokio::test]
async fn test_sql_error_is_reported() {
    let (executor, _file) = create_temp_db().await;
    let err = executor
        .execute(SqlCommand::text("INSERT INTO missing VALUES (1)"), None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("missing"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_commands() {
    let (executor, _file) = create_temp_db().await;

    let handles: Vec<_> = (0..16i64)
        .map(|n| {
            let executor = executor.clone();
            tokio::spawn(async move {
                let mut params = Params::new().with_input("n", DataType::Integer, n);
                executor
                    .execute_scalar::<i64>(SqlCommand::text("SELECT :n * 10"), Some(&mut params))
                    .await
                    .unwrap()
                    .data
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap(), Some(n as i64 * 10));
    }
}

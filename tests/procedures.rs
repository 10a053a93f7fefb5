use rust_sqlcommand::{
    entity, DataType, Error, Executor, ExecutorConfig, Params, ParamsTemplate, SqlCommand,
    SqliteConnectionString, SqliteDriver, Value,
};
use std::time::Duration;
use tempfile::NamedTempFile;

#[derive(Debug, Default, Clone, PartialEq)]
struct UserSummary {
    id: i64,
    name: String,
}

entity!(UserSummary { id, name });

fn driver() -> SqliteDriver {
    SqliteDriver::new()
        .with_procedure("ProcCrearTabla", |ctx| {
            ctx.run(
                "CREATE TABLE users (
                    id INTEGER PRIMARY KEY,
                    name TEXT NOT NULL,
                    email TEXT UNIQUE NOT NULL
                )",
            )?;
            Ok(())
        })
        .with_procedure("ProcAltaUsuario", |ctx| {
            let taken = ctx
                .query_value::<i64>("SELECT count(*) FROM users WHERE email = :pEmail")?
                .unwrap_or(0);
            if taken > 0 {
                ctx.set_output("pResultado", false)?;
                ctx.set_output("pMsg", "email already registered")?;
                ctx.set_output("pCodigo", 409)?;
                return Ok(());
            }
            ctx.run("INSERT INTO users (name, email) VALUES (:pName, :pEmail)")?;
            let id = ctx.connection().last_insert_rowid();
            ctx.set_output("pResultado", true)?;
            ctx.set_output("pMsg", "user registered")?;
            ctx.set_output("pId", id)?;
            Ok(())
        })
        .with_procedure("ProcListados", |ctx| {
            ctx.run("SELECT id, name FROM users ORDER BY id; SELECT count(*) FROM users")?;
            Ok(())
        })
        .with_procedure("ProcEco", |ctx| {
            let text: String = ctx.input("pTexto")?;
            ctx.set_output("pMsg", text)?;
            Ok(())
        })
        .with_procedure("ProcFalla", |_ctx| {
            Err(anyhow::anyhow!("stock ledger is locked").into())
        })
}

fn status_template() -> ParamsTemplate {
    let mut template = ParamsTemplate::new();
    template.add_default_output("pResultado", DataType::Boolean);
    template.add_default_output("pMsg", DataType::VarChar);
    template.add_default_output("pCodigo", DataType::Integer);
    template
}

async fn create_temp_db() -> (Executor, NamedTempFile) {
    let temp_file = NamedTempFile::new().unwrap();
    let connection_string = SqliteConnectionString::new(temp_file.path().to_str().unwrap())
        .with_busy_timeout(Duration::from_secs(5))
        .to_string();
    let executor = Executor::new(ExecutorConfig::new(connection_string), driver());
    executor.execute("ProcCrearTabla", None).await.unwrap();
    (executor, temp_file)
}

fn registration(template: &ParamsTemplate, name: &str, email: &str) -> Params {
    template
        .create_default()
        .with_input("pName", DataType::VarChar, name)
        .with_input("pEmail", DataType::VarChar, email)
        .with_output_alias("pId", DataType::BigInt, "id")
}

#[tokio::test]
async fn test_procedure_outputs_fill_envelope_and_bag() {
    let (executor, _file) = create_temp_db().await;
    let template = status_template();

    let mut params = registration(&template, "Ana", "ana@example.com");
    let outcome = executor
        .execute("ProcAltaUsuario", Some(&mut params))
        .await
        .unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.message, "user registered");
    assert_eq!(outcome.code, 0);
    assert_eq!(outcome.bag.len(), 1);
    assert_eq!(outcome.bag.get_as::<i64>("id").unwrap(), 1);
    assert!(params.get::<bool>("pResultado").unwrap());
    assert_eq!(params.get::<i64>("pId").unwrap(), 1);
}

#[tokio::test]
async fn test_procedure_reports_business_failure() {
    let (executor, _file) = create_temp_db().await;
    let template = status_template();

    let mut first = registration(&template, "Ana", "ana@example.com");
    executor
        .execute("ProcAltaUsuario", Some(&mut first))
        .await
        .unwrap();

    let mut second = registration(&template, "Ana Maria", "ana@example.com");
    let outcome = executor
        .execute("ProcAltaUsuario", Some(&mut second))
        .await
        .unwrap();
    assert!(!outcome.success);
    assert_eq!(outcome.message, "email already registered");
    assert_eq!(outcome.code, 409);
    // pId was never set, so the bag carries an empty string
    assert_eq!(outcome.bag.get("id"), Some(&Value::Text(String::new())));
}

#[tokio::test]
async fn test_unknown_procedure() {
    let (executor, _file) = create_temp_db().await;
    let err = executor.execute("ProcNoExiste", None).await.unwrap_err();
    assert!(matches!(err, Error::UnknownProcedure(name) if name == "ProcNoExiste"));
}

#[tokio::test]
async fn test_procedure_error_propagates() {
    let (executor, _file) = create_temp_db().await;
    let mut params = status_template().create_default();
    let err = executor
        .execute("procfalla", Some(&mut params))
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "stock ledger is locked");
    assert_eq!(params.value("pResultado"), Some(&Value::Null));
}

#[tokio::test]
async fn test_procedure_result_sets() {
    let (executor, _file) = create_temp_db().await;
    let template = status_template();
    for (name, email) in [("Ana", "ana@x"), ("Luis", "luis@x")] {
        let mut params = registration(&template, name, email);
        executor
            .execute("ProcAltaUsuario", Some(&mut params))
            .await
            .unwrap();
    }

    let outcome = executor
        .execute_multi("ProcListados", None, |reader| {
            Box::pin(async move {
                let users = reader.read_many::<UserSummary>().await?;
                let total = reader.read_one::<i64>().await?;
                Ok::<_, Error>((users, total, reader.has_next()))
            })
        })
        .await
        .unwrap();

    let (users, total, more) = outcome.data.unwrap();
    assert_eq!(
        users,
        vec![
            UserSummary { id: 1, name: "Ana".into() },
            UserSummary { id: 2, name: "Luis".into() },
        ]
    );
    assert_eq!(total, Some(2));
    assert!(!more);

    let typed = executor
        .execute_typed::<UserSummary>("ProcListados", None)
        .await
        .unwrap();
    assert_eq!(typed.data.map(|u| u.len()), Some(2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_template_copies_are_independent_under_concurrency() {
    let (executor, _file) = create_temp_db().await;
    let template = status_template();

    let handles: Vec<_> = (0..12)
        .map(|n| {
            let executor = executor.clone();
            let mut params = template
                .create_default()
                .with_input("pTexto", DataType::VarChar, format!("call {n}"));
            tokio::spawn(async move {
                let outcome = executor.execute("ProcEco", Some(&mut params)).await.unwrap();
                (outcome.message, params)
            })
        })
        .collect();

    for (n, handle) in handles.into_iter().enumerate() {
        let (message, params) = handle.await.unwrap();
        assert_eq!(message, format!("call {n}"));
        assert_eq!(params.get::<String>("pMsg").unwrap(), format!("call {n}"));
    }
    assert!(template.defaults().iter().all(|p| p.value.is_null()));
}

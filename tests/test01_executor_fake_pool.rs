use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use mssql_middleware::prelude::*;
use mssql_middleware::{PoolFactory, SqlExecutor};
use serde::Deserialize;
use tokio::runtime::Runtime;

/// Pool stand-in that answers every query with one row holding the bound parameters.
#[derive(Clone, Default)]
struct EchoPool {
    queries: Arc<AtomicUsize>,
}

#[async_trait]
impl SqlExecutor for EchoPool {
    async fn execute_batch(&self, query: &str) -> Result<(), MssqlMiddlewareError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if query.trim().is_empty() {
            return Err(MssqlMiddlewareError::ExecutionError("empty batch".into()));
        }
        Ok(())
    }

    async fn execute_select(
        &self,
        _query: &str,
        params: Option<&NamedParams>,
    ) -> Result<ResultSet, MssqlMiddlewareError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let mut rs = ResultSet::with_capacity(1);
        let Some(params) = params else {
            rs.set_column_names(Arc::new(vec!["number".to_string()]));
            rs.add_row_values(vec![RowValues::Int(1)]);
            return Ok(rs);
        };
        let (names, values): (Vec<_>, Vec<_>) = params
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .unzip();
        rs.set_column_names(Arc::new(names));
        rs.add_row_values(values);
        Ok(rs)
    }

    async fn execute_multi(
        &self,
        query: &str,
        params: Option<&NamedParams>,
    ) -> Result<Vec<ResultSet>, MssqlMiddlewareError> {
        let first = self.execute_select(query, params).await?;
        let second = self.execute_select(query, None).await?;
        Ok(vec![first, second])
    }

    async fn execute_dml(
        &self,
        _query: &str,
        params: Option<&NamedParams>,
    ) -> Result<usize, MssqlMiddlewareError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        Ok(params.map_or(0, NamedParams::len))
    }
}

#[derive(Default)]
struct EchoFactory {
    opened: AtomicUsize,
}

#[async_trait]
impl PoolFactory for EchoFactory {
    type Pool = EchoPool;

    async fn open(&self, _config: &ConnectionConfig) -> Result<EchoPool, MssqlMiddlewareError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        Ok(EchoPool::default())
    }

    async fn close(&self, _pool: EchoPool) {}
}

#[derive(Debug, Deserialize, PartialEq)]
struct Answer {
    value: i64,
    label: String,
}

#[test]
fn queries_fail_before_initialize() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let manager = PoolManager::with_factory(EchoFactory::default());

        let err = execute_sql(&manager, "SELECT 1 AS number", None).await.unwrap_err();
        assert!(matches!(err, MssqlMiddlewareError::NotInitialized));
        let err = execute_sql_batch(&manager, "SELECT 1").await.unwrap_err();
        assert!(matches!(err, MssqlMiddlewareError::NotInitialized));

        // nothing was opened implicitly
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 0);
    });
}

#[test]
fn named_params_reach_the_pool() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let manager = PoolManager::with_factory(EchoFactory::default());
        manager.initialize(&ConnectionConfig::default()).await.unwrap();

        let params = NamedParams::new().with("@value", 42).with("label", "answer");
        let rs = execute_sql(&manager, "SELECT @value AS value, @label AS label", Some(&params))
            .await
            .unwrap();

        assert_eq!(rs.len(), 1);
        assert_eq!(rs.results[0].get("value"), Some(&RowValues::Int(42)));
        assert_eq!(
            rs.results[0].get("label").and_then(RowValues::as_text),
            Some("answer")
        );

        let typed: Vec<Answer> =
            execute_sql_as(&manager, "SELECT @value AS value, @label AS label", Some(&params))
                .await
                .unwrap();
        assert_eq!(
            typed,
            vec![Answer {
                value: 42,
                label: "answer".into()
            }]
        );
    });
}

#[test]
fn mismatched_row_shape_is_a_decode_error() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let manager = PoolManager::with_factory(EchoFactory::default());
        manager.initialize(&ConnectionConfig::default()).await.unwrap();

        let err = execute_sql_as::<Answer, _>(&manager, "SELECT 1 AS number", None)
            .await
            .unwrap_err();
        assert!(matches!(err, MssqlMiddlewareError::DecodeError(_)));
    });
}

#[test]
fn multi_dml_and_batch_use_the_same_pool() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let manager = PoolManager::with_factory(EchoFactory::default());
        let pool = manager.initialize(&ConnectionConfig::default()).await.unwrap();

        let params = NamedParams::new().with("a", 1).with("b", true);
        let sets = execute_sql_multi(&manager, "SELECT @a; SELECT 1", Some(&params))
            .await
            .unwrap();
        assert_eq!(sets.len(), 2);
        assert_eq!(sets[1].results[0].get("number"), Some(&RowValues::Int(1)));

        let affected = execute_sql_dml(&manager, "UPDATE t SET a = @a", Some(&params))
            .await
            .unwrap();
        assert_eq!(affected, 2);

        execute_sql_batch(&manager, "CREATE TABLE t (a int)").await.unwrap();
        assert!(matches!(
            execute_sql_batch(&manager, "  ").await,
            Err(MssqlMiddlewareError::ExecutionError(_))
        ));

        assert_eq!(pool.queries.load(Ordering::SeqCst), 5);
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 1);
    });
}

#[test]
fn concurrent_queries_share_one_pool() {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(4)
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async {
        let manager = Arc::new(PoolManager::with_factory(EchoFactory::default()));
        let config = ConnectionConfig::default();

        let tasks: Vec<_> = (0..32_i64)
            .map(|i| {
                let manager = Arc::clone(&manager);
                let config = config.clone();
                tokio::spawn(async move {
                    manager.initialize(&config).await?;
                    let params = NamedParams::new().with("value", i);
                    execute_sql(&manager, "SELECT @value AS value", Some(&params)).await
                })
            })
            .collect();

        for (i, task) in tasks.into_iter().enumerate() {
            let rs = task.await.unwrap().unwrap();
            let expected = i64::try_from(i).unwrap();
            assert_eq!(rs.results[0].get("value"), Some(&RowValues::Int(expected)));
        }
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 1);
        assert_eq!(manager.get().unwrap().queries.load(Ordering::SeqCst), 32);
    });
}

#[test]
fn close_makes_queries_fail_until_reinitialized() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let manager = PoolManager::with_factory(EchoFactory::default());
        manager.initialize(&ConnectionConfig::default()).await.unwrap();
        manager.close().await;

        let err = execute_sql(&manager, "SELECT 1 AS number", None).await.unwrap_err();
        assert!(matches!(err, MssqlMiddlewareError::NotInitialized));

        manager.initialize(&ConnectionConfig::default()).await.unwrap();
        let rs = execute_sql(&manager, "SELECT 1 AS number", None).await.unwrap();
        assert_eq!(rs.results[0].get("number"), Some(&RowValues::Int(1)));
        assert_eq!(manager.factory().opened.load(Ordering::SeqCst), 2);
    });
}

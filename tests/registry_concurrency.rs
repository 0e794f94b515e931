// Concurrent status toggling against concurrent readers
#[cfg(test)]
mod test {
    use std::sync::Arc;

    use axon_dispatch::core::{Api, ApiRegistry, ApiStatus, RequestMethod};

    const APIS: usize = 8;
    const TOGGLES: usize = 200;

    fn name(i: usize) -> String {
        format!("GET /svc/{i}")
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_readers_never_see_torn_entries() {
        let registry = Arc::new(ApiRegistry::new());
        for i in 0..APIS {
            registry
                .register(
                    Api::new(name(i), RequestMethod::Get)
                        .with_status(ApiStatus::Up)
                        .with_metadata(serde_json::json!({ "index": i })),
                )
                .await;
        }

        let mut tasks = Vec::new();
        for i in 0..APIS {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for round in 0..TOGGLES {
                    let status = if round % 2 == 0 {
                        ApiStatus::Down
                    } else {
                        ApiStatus::Up
                    };
                    assert!(registry.set_status(&name(i), status).await);
                }
            }));
        }
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for round in 0..TOGGLES {
                    let i = round % APIS;
                    let api = registry.find(&name(i)).await.unwrap();
                    // Every field but status is untouched by toggling
                    assert_eq!(api.name, name(i));
                    assert_eq!(api.method, RequestMethod::Get);
                    assert_eq!(api.metadata["index"], i);
                    assert!(matches!(api.status, ApiStatus::Up | ApiStatus::Down));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // An even number of toggles per API ends on Up
        for i in 0..APIS {
            assert!(registry.is_up(&name(i)).await);
        }
        assert_eq!(registry.len(), APIS);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_contended_toggles_on_one_name() {
        let registry = Arc::new(ApiRegistry::new());
        let shared = "GET /svc/shared";
        registry
            .register(
                Api::new(shared, RequestMethod::Get)
                    .with_status(ApiStatus::Up)
                    .with_metadata(serde_json::json!({ "owner": "billing" })),
            )
            .await;

        let mut tasks = Vec::new();
        for writer in 0..4 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for round in 0..TOGGLES {
                    let changed = if (round + writer) % 2 == 0 {
                        registry.offline(shared).await
                    } else {
                        registry.online(shared).await
                    };
                    assert!(changed);
                }
            }));
        }
        for _ in 0..4 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                for _ in 0..TOGGLES {
                    let api = registry.find(shared).await.unwrap();
                    assert_eq!(api.name, shared);
                    assert_eq!(api.method, RequestMethod::Get);
                    assert_eq!(api.metadata["owner"], "billing");
                    assert!(matches!(api.status, ApiStatus::Up | ApiStatus::Down));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        // Whichever toggle landed last wins; the entry stays whole
        let api = registry.find(shared).await.unwrap();
        assert!(matches!(api.status, ApiStatus::Up | ApiStatus::Down));
        assert_eq!(api.metadata["owner"], "billing");
        assert_eq!(registry.len(), 1);

        registry.offline(shared).await;
        assert!(!registry.is_up(shared).await);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_deregister_during_reads() {
        let registry = Arc::new(ApiRegistry::new());
        registry
            .register(Api::new("GET /gone", RequestMethod::Get).with_status(ApiStatus::Up))
            .await;

        let reader = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                for _ in 0..TOGGLES {
                    if let Some(api) = registry.find("GET /gone").await {
                        assert_eq!(api.name, "GET /gone");
                    }
                    tokio::task::yield_now().await;
                }
            })
        };
        assert!(registry.deregister("GET /gone").await);
        reader.await.unwrap();

        assert!(!registry.online("GET /gone").await);
        assert!(registry.is_empty());
    }
}

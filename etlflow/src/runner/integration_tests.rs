//! End-to-end tests for the runner.

#[cfg(test)]
mod tests {
    use crate::blocks::FnTask;
    use crate::config::{BlockOptions, RunnerConfig};
    use crate::errors::{ConfigurationError, EtlflowError};
    use crate::pipeline::Pipeline;
    use crate::runner::sink::MockSummarySink;
    use crate::runner::{ContainerRegistration, RunFilter, Runner};
    use crate::testing::{
        assert_pipeline_failed, assert_pipeline_succeeded, assert_wave, entity_pipeline, find_block,
        find_summary, CollectingSummarySink, ExecutionLog, FailingLoader, RecordingLoader,
        VecExtractor,
    };
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A container whose pipelines produce `target` from `sources`.
    fn entity_container(
        name: &str,
        pipelines: &[(&'static str, &'static str, &'static [&'static str])],
        log: &ExecutionLog,
    ) -> ContainerRegistration {
        pipelines
            .iter()
            .fold(ContainerRegistration::new(name), |container, &(pipeline, target, sources)| {
                let log = log.clone();
                container.pipeline(pipeline, move || {
                    entity_pipeline(pipeline, target, sources, &log)
                })
            })
    }

    fn names(summaries: &[crate::core::PipelineSummary]) -> Vec<&str> {
        summaries.iter().map(|s| s.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_customer_order_order_line_waves() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(entity_container(
                "Sales",
                &[
                    ("order_lines", "OrderLine", &["Order", "Customer"]),
                    ("orders", "Order", &["Customer"]),
                    ("customers", "Customer", &[]),
                ],
                &log,
            ))
            .build();

        let summaries = runner.run_all().await;

        assert_eq!(names(&summaries), vec!["customers", "orders", "order_lines"]);
        assert_wave(&summaries, "customers", 1);
        assert_wave(&summaries, "orders", 2);
        assert_wave(&summaries, "order_lines", 3);
        assert_eq!(log.entries(), vec!["customers", "orders", "order_lines"]);
        for summary in &summaries {
            assert_pipeline_succeeded(summary);
            assert_eq!(summary.container, "Sales");
            assert_eq!(summary.cluster, "Default");
            assert_eq!(find_block(summary, "write").rows_inserted, 3);
        }
    }

    #[tokio::test]
    async fn test_cycle_skips_only_its_cluster() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(
                entity_container("Loop", &[("p", "P", &["Q"]), ("q", "Q", &["P"])], &log)
                    .in_cluster("Broken"),
            )
            .container(entity_container("Sales", &[("customers", "Customer", &[])], &log))
            .build();

        let summaries = runner.run_all().await;

        assert_eq!(names(&summaries), vec!["customers"]);
        assert_eq!(log.entries(), vec!["customers"]);
        assert!(runner.run_cluster("Broken").await.is_empty());
    }

    #[tokio::test]
    async fn test_same_target_pipelines_share_a_wave() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(entity_container(
                "Crm",
                &[
                    ("crm_customers", "Customer", &[]),
                    ("orders", "Order", &["Customer"]),
                ],
                &log,
            ))
            .container(entity_container(
                "Shop",
                &[
                    ("shop_customers", "Customer", &["Region"]),
                    ("regions", "Region", &[]),
                ],
                &log,
            ))
            .build();

        let summaries = runner.run_all().await;

        assert_wave(&summaries, "regions", 1);
        assert_wave(&summaries, "crm_customers", 2);
        assert_wave(&summaries, "shop_customers", 2);
        assert_wave(&summaries, "orders", 3);

        let orders = log.position("orders").unwrap();
        assert!(log.position("crm_customers").unwrap() < orders);
        assert!(log.position("shop_customers").unwrap() < orders);
    }

    #[tokio::test]
    async fn test_two_clusters_are_tagged_and_isolated() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(
                entity_container("Orders", &[("orders", "Order", &["Customer"])], &log)
                    .in_cluster("Sales"),
            )
            .container(entity_container("Customers", &[("customers", "Customer", &[])], &log))
            .build();

        let summaries = runner.run_all().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(find_summary(&summaries, "orders").cluster, "Sales");
        assert_eq!(find_summary(&summaries, "customers").cluster, "Default");
        // Customer is produced in another cluster, so orders does not wait.
        assert_wave(&summaries, "orders", 1);
        assert_wave(&summaries, "customers", 1);

        let sales = runner.run_cluster("Sales").await;
        assert_eq!(names(&sales), vec!["orders"]);
    }

    #[tokio::test]
    async fn test_configured_default_cluster() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .config(RunnerConfig::new().with_default_cluster("Warehouse"))
            .container(entity_container("Sales", &[("customers", "Customer", &[])], &log))
            .build();

        let summaries = runner.run_all().await;
        assert_eq!(summaries[0].cluster, "Warehouse");
    }

    #[tokio::test]
    async fn test_error_budget_stops_load_after_three_failures() {
        let failing = FailingLoader::new();
        let loader = failing.clone();
        let runner = Runner::builder()
            .container(ContainerRegistration::new("Sales").pipeline("customers", move || {
                Pipeline::builder("customers")
                    .options(BlockOptions::new().with_batch_size(1).with_workers(1))
                    .extract("read", VecExtractor::new(vec![1_u32, 2, 3, 4]))
                    .load::<u32, _>("write", loader.clone())
                    .build()
            }))
            .build();

        let summaries = runner.run_all().await;
        let summary = find_summary(&summaries, "customers");
        assert_pipeline_failed(summary);
        assert!(summary.error.is_none());

        let write = find_block(summary, "write");
        assert_eq!(write.exceptions.len(), 3);
        assert_eq!(write.total_batches, 3);
        assert_eq!(write.exceptions["batch 2 rejected"].batch_number, 2);
        assert_eq!(failing.calls(), 3);
        assert!(find_block(summary, "read").has_completed_without_error());
    }

    #[tokio::test]
    async fn test_error_budget_holds_with_concurrent_load_workers() {
        let failing = FailingLoader::new();
        let loader = failing.clone();
        let runner = Runner::builder()
            .container(ContainerRegistration::new("Sales").pipeline("customers", move || {
                Pipeline::builder("customers")
                    .options(BlockOptions::new().with_batch_size(1).with_workers(4))
                    .extract("read", VecExtractor::new((1..=8_u32).collect()))
                    .load::<u32, _>("write", loader.clone())
                    .build()
            }))
            .build();

        let summaries = runner.run_all().await;
        let write = find_block(find_summary(&summaries, "customers"), "write");
        assert_eq!(write.exceptions.len(), 3);
        assert_eq!(write.total_batches, 3);
        assert_eq!(failing.calls(), 3);
    }

    #[tokio::test]
    async fn test_failing_pipeline_does_not_affect_wave_siblings() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(
                entity_container("Sales", &[("customers", "Customer", &[])], &log).pipeline(
                    "regions",
                    || {
                        Pipeline::builder("regions")
                            .extract("read", VecExtractor::new(vec![1_u32, 2]))
                            .load::<u32, _>("write", FailingLoader::with_message("disk full"))
                            .build()
                    },
                ),
            )
            .build();

        let summaries = runner.run_all().await;
        assert_pipeline_succeeded(find_summary(&summaries, "customers"));
        assert_pipeline_failed(find_summary(&summaries, "regions"));
    }

    #[tokio::test]
    async fn test_factory_error_skips_pipeline() {
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(
                entity_container("Sales", &[("customers", "Customer", &[])], &log)
                    .pipeline("half_built", || {
                        Pipeline::builder("half_built")
                            .extract("read", VecExtractor::new(vec![1_u32]))
                            .build()
                    })
                    .pipeline("unavailable", || {
                        Err::<Pipeline, _>(EtlflowError::Internal("source offline".to_string()))
                    }),
            )
            .build();

        let summaries = runner.run_all().await;
        assert_eq!(names(&summaries), vec!["customers"]);
    }

    #[tokio::test]
    async fn test_filters_select_pipelines() {
        let log = ExecutionLog::new();
        let nightly_log = log.clone();
        let runner = Runner::builder()
            .container(
                entity_container("Sales", &[("customers", "Customer", &[])], &log).tagged_pipeline(
                    "orders",
                    ["nightly"],
                    move || entity_pipeline("orders", "Order", &["Customer"], &nightly_log),
                ),
            )
            .container(entity_container("Finance", &[("ledger", "Ledger", &[])], &log))
            .build();

        let nightly = runner.run(&RunFilter::all().tag("nightly")).await;
        assert_eq!(names(&nightly), vec!["orders"]);
        // Customer is not produced in this run, so orders starts immediately.
        assert_wave(&nightly, "orders", 1);

        let by_name = runner
            .run(&RunFilter::all().name_matching("^(customers|ledger)$").unwrap())
            .await;
        assert_eq!(names(&by_name), vec!["customers", "ledger"]);

        let finance = runner.run_container("Finance").await;
        assert_eq!(names(&finance), vec!["ledger"]);

        let custom = runner
            .run(&RunFilter::all().where_method(|m| m.name.ends_with('s')))
            .await;
        assert_eq!(names(&custom), vec!["customers", "orders"]);
    }

    #[tokio::test]
    async fn test_block_defaults_come_from_config() {
        let loader = RecordingLoader::<u32>::new();
        let recorded = loader.clone();
        let runner = Runner::builder()
            .config(
                RunnerConfig::new().with_block_defaults(BlockOptions::new().with_batch_size(2)),
            )
            .container(ContainerRegistration::new("Sales").pipeline("numbers", move || {
                Pipeline::builder("numbers")
                    .extract("read", VecExtractor::new(vec![1_u32, 2, 3, 4, 5]))
                    .load("write", loader.clone())
                    .build()
            }))
            .build();

        let summaries = runner.run_all().await;
        assert_eq!(find_block(&summaries[0], "read").total_batches, 3);
        assert_eq!(recorded.batch_count(), 3);
        assert_eq!(recorded.records(), vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_untargeted_pipeline_gets_its_own_wave_slot() {
        let runner = Runner::builder()
            .container(ContainerRegistration::new("Maintenance").pipeline("housekeeping", || {
                Pipeline::builder("housekeeping")
                    .task("vacuum", FnTask::new(|_| async { Ok::<_, anyhow::Error>(()) }))
                    .task("analyze", FnTask::new(|_| async { Ok::<_, anyhow::Error>(()) }))
                    .build()
            }))
            .build();

        let summaries = runner.run_all().await;
        assert_eq!(summaries.len(), 1);
        assert_wave(&summaries, "housekeeping", 1);
        assert_pipeline_succeeded(&summaries[0]);
    }

    #[tokio::test]
    async fn test_factories_run_fresh_every_time() {
        let builds = Arc::new(AtomicUsize::new(0));
        let counter = builds.clone();
        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(ContainerRegistration::new("Sales").pipeline("customers", move || {
                counter.fetch_add(1, Ordering::SeqCst);
                entity_pipeline("customers", "Customer", &[], &log)
            }))
            .build();

        let first = runner.run_all().await;
        let second = runner.run_all().await;

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_ne!(first[0].run_id, second[0].run_id);
    }

    #[tokio::test]
    async fn test_sinks_receive_every_summary() {
        let collecting = CollectingSummarySink::new();
        let mut mock = MockSummarySink::new();
        mock.expect_output()
            .withf(|summaries| summaries.len() == 2)
            .times(1)
            .return_const(false);

        let log = ExecutionLog::new();
        let runner = Runner::builder()
            .container(entity_container(
                "Sales",
                &[("customers", "Customer", &[]), ("orders", "Order", &["Customer"])],
                &log,
            ))
            .sink(collecting.clone())
            .sink(mock)
            .build();

        // A sink reporting failure does not change what the run returns.
        let summaries = runner.run_all().await;
        assert_eq!(summaries.len(), 2);
        assert_eq!(collecting.calls(), 1);
        assert_eq!(collecting.summaries(), summaries);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let sink = CollectingSummarySink::new();
        let runner = Runner::builder().sink(sink.clone()).build();

        assert!(runner.run_all().await.is_empty());
        assert_eq!(sink.calls(), 1);
    }

    #[test]
    fn test_configuration_error_converts() {
        let err: EtlflowError = ConfigurationError::TooFewBlocks { count: 1 }.into();
        assert!(matches!(err, EtlflowError::Configuration(_)));
    }
}

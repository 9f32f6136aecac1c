use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use shardquery::analyze::{OrderBy, Symbol};
use shardquery::operation::{MemoryBreaker, ProjectorFactory, RamAccountingContext};
use shardquery::planner::projection::{AggregateMode, Aggregation, WindowDefinition};
use shardquery::planner::Projection;
use shardquery::{DataType, ExecutionSettings, ProjectorChain, Row, TerminalMode};

fn factory() -> ProjectorFactory {
    ProjectorFactory::new(ExecutionSettings::default())
}

fn long(index: usize) -> Symbol {
    Symbol::input(index, DataType::Long)
}

/// Push `rows` into every shard of `chain` from blocking tasks and finish them
async fn run_shards(chain: &ProjectorChain, shards: Vec<Vec<Row>>) {
    let heads = shards
        .iter()
        .map(|_| chain.new_shard_downstream_projector(&factory()).unwrap())
        .collect::<Vec<_>>();
    chain.start_projections().unwrap();

    let tasks = heads.into_iter().zip(shards).map(|(head, rows)| {
        tokio::task::spawn_blocking(move || {
            for row in rows {
                if !head.set_next_row(row).unwrap() {
                    break;
                }
            }
            head.upstream_finished().unwrap();
        })
    });
    for task in futures::future::join_all(tasks).await {
        task.unwrap();
    }
}

#[tokio::test]
async fn test_partial_aggregation_on_shards() {
    let projections = vec![
        Projection::aggregation(
            vec![],
            vec![
                Aggregation::new("count", None, DataType::Long, AggregateMode::IterPartial),
                Aggregation::new("avg", Some(long(0)), DataType::Double, AggregateMode::IterPartial),
            ],
        )
        .on_shard(),
        Projection::aggregation(
            vec![],
            vec![
                Aggregation::new("count", Some(long(0)), DataType::Long, AggregateMode::PartialFinal),
                Aggregation::new(
                    "avg",
                    Some(Symbol::input(1, DataType::Array(Box::new(DataType::Double)))),
                    DataType::Double,
                    AggregateMode::PartialFinal,
                ),
            ],
        ),
    ];
    let chain = ProjectorChain::new(
        3,
        projections,
        &factory(),
        RamAccountingContext::unbounded("agg"),
        TerminalMode::Collect,
    )
    .unwrap();

    let shards = vec![
        vec![vec![json!(1)], vec![json!(2)]],
        vec![vec![json!(3)]],
        vec![vec![json!(4)], vec![json!(5)], vec![json!(6)]],
    ];
    run_shards(&chain, shards).await;

    let rows = chain.result().await.unwrap();
    assert_eq!(*rows, vec![vec![json!(6), json!(3.5)]]);
    assert_eq!(chain.shard_projector_count(), 3);
}

#[tokio::test]
async fn test_ordered_top_n_across_shards() {
    let order = OrderBy::desc(long(0));
    let projections = vec![
        Projection::top_n(0, Some(2), Some(order.clone()), vec![long(0)]).on_shard(),
        Projection::merge(order.clone()),
        Projection::top_n(1, Some(3), Some(order), vec![long(0)]),
    ];
    let chain = ProjectorChain::new(
        2,
        projections,
        &factory(),
        RamAccountingContext::unbounded("topn"),
        TerminalMode::Collect,
    )
    .unwrap();
    assert_eq!(chain.node_projector_names(), vec!["merge", "topN", "collecting"]);

    let shards = vec![
        (0..10).map(|i| vec![json!(i)]).collect(),
        (5..8).map(|i| vec![json!(i * 2)]).collect(),
    ];
    run_shards(&chain, shards).await;

    // shard tops: [9, 8] and [14, 12]
    let rows: Vec<Row> = chain.iter().unwrap().collect();
    assert_eq!(rows, vec![vec![json!(12)], vec![json!(9)], vec![json!(8)]]);
}

#[tokio::test]
async fn test_window_rank_on_node_tier() {
    let definition = WindowDefinition {
        partition_by: vec![],
        order_by: Some(OrderBy::asc(long(0))),
    };
    let projections = vec![Projection::window(
        definition,
        vec!["rank".to_string(), "dense_rank".to_string()],
    )];
    let chain = ProjectorChain::new(
        2,
        projections,
        &factory(),
        RamAccountingContext::unbounded("window"),
        TerminalMode::Collect,
    )
    .unwrap();

    let shards = vec![
        vec![vec![json!(3)], vec![json!(5)], vec![json!(3)]],
        vec![vec![json!(6)], vec![json!(3)], vec![json!(5)]],
    ];
    run_shards(&chain, shards).await;

    let rows = chain.result().await.unwrap();
    let ranks: Vec<i64> = rows.iter().map(|r| r[1].as_i64().unwrap()).collect();
    let dense: Vec<i64> = rows.iter().map(|r| r[2].as_i64().unwrap()).collect();
    assert_eq!(ranks, vec![1, 1, 1, 4, 4, 6]);
    assert_eq!(dense, vec![1, 1, 1, 2, 2, 3]);
}

#[tokio::test]
async fn test_stream_mode_across_shards() {
    let chain = ProjectorChain::new(
        3,
        vec![],
        &factory(),
        RamAccountingContext::unbounded("stream"),
        TerminalMode::Stream { buffer: 4 },
    )
    .unwrap();
    let heads = (0..3)
        .map(|_| chain.new_shard_downstream_projector(&factory()).unwrap())
        .collect::<Vec<_>>();
    chain.start_projections().unwrap();
    let stream = chain.take_row_stream().unwrap();

    let producers = heads
        .into_iter()
        .enumerate()
        .map(|(shard, head)| {
            std::thread::spawn(move || {
                for i in 0..50 {
                    head.set_next_row(vec![json!(shard * 100 + i)]).unwrap();
                }
                head.upstream_finished().unwrap();
            })
        })
        .collect::<Vec<_>>();

    let rows: Vec<Row> = stream.map(|row| row.unwrap()).collect().await;
    for producer in producers {
        producer.join().unwrap();
    }
    assert_eq!(rows.len(), 150);

    // rows of one shard keep their order
    let shard_one: Vec<i64> = rows
        .iter()
        .map(|r| r[0].as_i64().unwrap())
        .filter(|v| (100..200).contains(v))
        .collect();
    assert_eq!(shard_one, (100..150).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_ram_is_released_with_the_chain() {
    let breaker = Arc::new(MemoryBreaker::new("query", 0));
    let ram = RamAccountingContext::new("job", Arc::clone(&breaker));
    let chain = ProjectorChain::new(
        1,
        vec![Projection::merge(OrderBy::asc(long(0)))],
        &factory(),
        ram,
        TerminalMode::Collect,
    )
    .unwrap();

    run_shards(&chain, vec![(0..100).map(|i| vec![json!(i)]).collect()]).await;
    assert_eq!(chain.result().await.unwrap().len(), 100);
    assert!(breaker.used() > 0);

    drop(chain);
    assert_eq!(breaker.used(), 0);
}

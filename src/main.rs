use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use serde_json::json;
use shardquery::analyze::{
    AnalyzedRelation, OrderBy, QueriedDocTable, QuerySpec, Symbol, TableIdent, TableInfo,
    WhereClause,
};
use shardquery::planner::{ConsumerContext, PlannerContext};
use shardquery::{DataType, ExecutionSettings, LocalJobExecutor, MemoryCluster, QueryThenFetchConsumer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "shardquery")]
#[command(about = "Run a query-then-fetch select against an in-memory sharded table", long_about = None)]
struct Args {
    /// Settings file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Logical nodes the table is spread over
    #[arg(long = "node", default_values_t = vec!["node-1".to_string(), "node-2".to_string()])]
    nodes: Vec<String>,

    /// Number of shards
    #[arg(long, default_value_t = 4)]
    shards: u16,

    /// Number of generated documents
    #[arg(long, default_value_t = 1000)]
    rows: usize,

    /// Only select documents with a score above this value
    #[arg(long)]
    min_score: Option<i64>,

    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, default_value_t = 0)]
    offset: usize,

    /// Order by score descending
    #[arg(long)]
    desc: bool,

    /// Print rows as they leave the merge chain instead of collecting them
    #[arg(long)]
    stream: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shardquery=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = match &args.config {
        Some(path) => ExecutionSettings::from_file(path)?,
        None => ExecutionSettings::default(),
    }
    .with_env_overrides()?;
    settings.validate()?;
    tracing::info!("Node ID: {}", settings.node_id);

    let ident = TableIdent::new(TableIdent::DEFAULT_SCHEMA, "players");
    let cluster = Arc::new(MemoryCluster::new());
    let nodes: Vec<&str> = args.nodes.iter().map(String::as_str).collect();
    let routing = cluster.create_table(&ident, &nodes, args.shards)?;
    for i in 0..args.rows {
        let score = (i * 7919) % 1000;
        cluster.insert(
            &ident,
            &format!("player-{}", i),
            json!({"name": format!("player {}", i), "score": score}),
        )?;
    }
    tracing::info!(
        "Loaded {} documents into {} shards on {} nodes",
        cluster.document_count(&ident),
        args.shards,
        nodes.len()
    );

    let table = Arc::new(
        TableInfo::builder(ident, routing)
            .add("name", DataType::String)
            .add("score", DataType::Long)
            .build(),
    );
    let name = Symbol::Reference(table.reference("name")?);
    let score = Symbol::Reference(table.reference("score")?);

    let order_by = if args.desc {
        OrderBy::desc(score.clone())
    } else {
        OrderBy::asc(score.clone())
    };
    let mut spec = QuerySpec::new(vec![name, score.clone()])
        .with_order_by(order_by)
        .with_offset(args.offset);
    if let Some(limit) = args.limit {
        spec = spec.with_limit(limit);
    }
    if let Some(min_score) = args.min_score {
        spec = spec.with_where(WhereClause::new(Symbol::function(
            "op_>",
            vec![score, Symbol::literal(json!(min_score))],
            DataType::Boolean,
        )));
    }

    let relation = AnalyzedRelation::QueriedDocTable(QueriedDocTable::new(table, spec));
    let mut ctx = ConsumerContext::new(PlannerContext::new(settings.clone()));
    let plan = QueryThenFetchConsumer::plan(&relation, &mut ctx)?
        .ok_or_else(|| anyhow::anyhow!("query-then-fetch does not apply to this query"))?;
    tracing::info!("Planned job {}", plan.job_id());

    let executor = LocalJobExecutor::new(settings, cluster);
    let mut count = 0;
    if args.stream {
        let mut rows = executor.execute_stream(&plan).await?;
        while let Some(row) = rows.next().await {
            println!("{}", serde_json::to_string(&row?)?);
            count += 1;
        }
    } else {
        for row in executor.execute(&plan).await? {
            println!("{}", serde_json::to_string(&row)?);
            count += 1;
        }
    }
    tracing::info!(
        "{} rows, memory breaker tripped {} times",
        count,
        executor.breaker().trip_count()
    );
    Ok(())
}

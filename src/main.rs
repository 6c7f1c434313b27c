use anyhow::Context;
use clap::Parser;
use partition_displacer::memory::{Memory, MemoryDesc};
use partition_displacer::{
    DeserializedGraph, DisplaceStatus, DisplacerConfig, EvalBackend, PartitionDataDisplacer,
};
use serde::Serialize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Generate quantization-friendly inputs for a graph partition.
#[derive(Parser)]
#[command(name = "partition-displacer")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Graph dump (JSON)
    #[arg(value_name = "GRAPH")]
    graph: PathBuf,

    /// Op ids forming the partition; all ops when omitted
    #[arg(short, long, value_delimiter = ',')]
    partition: Vec<usize>,

    /// Tensor ids to displace; every displaceable input when omitted
    #[arg(short, long)]
    tensor: Vec<usize>,

    /// Filling configuration (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Include the generated values in the report
    #[arg(long)]
    values: bool,
}

#[derive(Serialize)]
struct TensorReport {
    tensor: usize,
    main_op: Option<usize>,
    port: Option<usize>,
    desc: MemoryDesc,
    status: DisplaceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<Vec<f64>>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let graph = DeserializedGraph::load(&cli.graph)
        .with_context(|| format!("loading {}", cli.graph.display()))?;
    let config = match &cli.config {
        Some(path) => DisplacerConfig::load(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => DisplacerConfig::default(),
    };
    let partition = if cli.partition.is_empty() {
        graph.ops().iter().map(|op| op.id).collect()
    } else {
        cli.partition.clone()
    };

    let displacer = PartitionDataDisplacer::new(&graph, &partition, config)?;
    let mut tensors = if cli.tensor.is_empty() {
        displacer.entries().keys().copied().collect()
    } else {
        cli.tensor.clone()
    };
    tensors.sort_unstable();

    let mut backend = EvalBackend::default();
    let mut reports = vec![];
    for tensor_id in tensors {
        let lt = graph
            .logical_tensor(tensor_id)
            .with_context(|| format!("tensor {tensor_id} is not in the graph"))?;
        let mut buffer = Memory::new(MemoryDesc::from_logical_tensor(lt)?);
        let status = displacer.displace(&mut backend, tensor_id, &mut buffer)?;
        let entry = displacer.entry(tensor_id);
        reports.push(TensorReport {
            tensor: tensor_id,
            main_op: entry.map(|e| graph.op(e.main_op).id),
            port: entry.map(|e| e.port),
            desc: buffer.desc().clone(),
            status,
            values: cli
                .values
                .then(|| buffer.data().to_f64_array().iter().copied().collect()),
        });
    }

    println!("{}", serde_json::to_string_pretty(&reports)?);
    Ok(())
}

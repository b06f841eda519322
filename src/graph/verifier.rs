use crate::graph::{Graph, INPUT_NODE_PREFIX};
use crate::types::{CompileOption, Device, FilterFormat};
use anyhow::{anyhow, bail, Result};
use std::collections::{HashMap, HashSet};

/// Static verifier for a transformed graph.
pub struct Verifier;

impl Verifier {
    /// Validates the graph against the post-compilation contract:
    /// every input resolves, producers are unique, operators are in
    /// topological order, and layout state matches the target device.
    pub fn verify(graph: &Graph, option: &CompileOption) -> Result<()> {
        let consts: HashSet<&str> = graph.tensors.iter().map(|t| t.name.as_str()).collect();
        let boundary: HashSet<String> = option
            .input_nodes
            .keys()
            .map(|name| format!("{}_{}", INPUT_NODE_PREFIX, name))
            .collect();

        let mut produced: HashMap<&str, &str> = HashMap::new();
        for op in &graph.op {
            for input in &op.input {
                let resolvable = produced.contains_key(input.as_str())
                    || consts.contains(input.as_str())
                    || boundary.contains(input.as_str());
                if !resolvable {
                    bail!(
                        "op {} reads {} before any producer (connectivity or ordering error)",
                        op.name,
                        input
                    );
                }
            }
            for output in &op.output {
                if let Some(prev) = produced.insert(output.as_str(), op.name.as_str()) {
                    bail!("tensor {} produced by both {} and {}", output, prev, op.name);
                }
            }
        }

        for name in &option.output_nodes {
            if !produced.contains_key(name.as_str()) {
                bail!("declared output {} is not produced by any op", name);
            }
        }

        let filter_format = graph.filter_format()?;
        let expected = match option.device {
            Device::Cpu => FilterFormat::Oihw,
            Device::Gpu => FilterFormat::Hwoi,
        };
        if filter_format != expected {
            bail!(
                "filter format is {:?}, expected {:?} for {:?}",
                filter_format,
                expected,
                option.device
            );
        }

        let target = option.target_data_format();
        for op in &graph.op {
            if let Some(format) = op.data_format() {
                if format != target {
                    return Err(anyhow!(
                        "op {} is tagged {:?} but the target layout is {:?}",
                        op.name,
                        format,
                        target
                    ));
                }
            }
        }

        Ok(())
    }
}

//! TOML network description and graph construction.
//!
//! The binary consumes a small declarative format rather than a trained
//! model file: the input variables, then one `[[layer]]` table per affine
//! layer with a weight row and bias per output neuron and an optional ReLU
//! flag. Layers chain implicitly; the last layer's outputs are the output
//! classes.
//!
//! ```toml
//! inputs = ["s01", "s02", "x01"]
//!
//! [[layer]]
//! outputs = ["h1"]
//! weights = [[0.0, 1.0, -0.5]]
//! bias = [0.1]
//! relu = true
//!
//! [[layer]]
//! outputs = ["o1", "o2"]
//! weights = [[1.0], [-1.0]]
//! bias = [0.0, 0.25]
//! ```

use core_cfg::{Cfg, CfgBuilder, NodeId};
use core_expr::{LinExpr, Variable};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct NetworkFile {
    pub inputs: Vec<String>,
    #[serde(default, rename = "layer")]
    pub layers: Vec<LayerFile>,
}

#[derive(Debug, Deserialize)]
pub struct LayerFile {
    pub outputs: Vec<String>,
    /// One row per output neuron, one column per previous-layer variable.
    pub weights: Vec<Vec<f64>>,
    /// One entry per output neuron; all zero when omitted.
    #[serde(default)]
    pub bias: Vec<f64>,
    #[serde(default)]
    pub relu: bool,
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network declares no input variables")]
    NoInputs,
    #[error("network declares no layers")]
    NoLayers,
    #[error("layer {layer}: {reason}")]
    Shape { layer: usize, reason: String },
    #[error("variable `{name}` is declared more than once")]
    Duplicate { name: String },
}

#[derive(Debug)]
pub struct Network {
    pub cfg: Cfg,
    pub inputs: BTreeSet<Variable>,
    pub outputs: BTreeSet<Variable>,
    pub activations: BTreeSet<NodeId>,
}

pub fn load(path: &Path) -> anyhow::Result<Network> {
    use anyhow::Context;
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading network description {}", path.display()))?;
    let file: NetworkFile =
        toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
    let network = build(file)?;
    info!(
        target: "runtime.startup",
        inputs = network.inputs.len(),
        outputs = network.outputs.len(),
        activations = network.activations.len(),
        nodes = network.cfg.len(),
        "network_loaded"
    );
    Ok(network)
}

pub fn build(file: NetworkFile) -> Result<Network, NetworkError> {
    if file.inputs.is_empty() {
        return Err(NetworkError::NoInputs);
    }
    if file.layers.is_empty() {
        return Err(NetworkError::NoLayers);
    }

    let mut declared: BTreeSet<Variable> = BTreeSet::new();
    let mut declare = |name: &str| -> Result<Variable, NetworkError> {
        let var = Variable::new(name);
        if !declared.insert(var.clone()) {
            return Err(NetworkError::Duplicate {
                name: name.to_string(),
            });
        }
        Ok(var)
    };

    let inputs: Vec<Variable> = file
        .inputs
        .iter()
        .map(|name| declare(name))
        .collect::<Result<_, _>>()?;

    let mut builder = CfgBuilder::new();
    let mut activations = BTreeSet::new();
    let mut previous = inputs.clone();
    for (index, layer) in file.layers.iter().enumerate() {
        let shape = |reason: String| NetworkError::Shape {
            layer: index,
            reason,
        };
        if layer.outputs.is_empty() {
            return Err(shape("layer declares no outputs".to_string()));
        }
        if layer.weights.len() != layer.outputs.len() {
            return Err(shape(format!(
                "{} weight rows for {} outputs",
                layer.weights.len(),
                layer.outputs.len()
            )));
        }
        if !layer.bias.is_empty() && layer.bias.len() != layer.outputs.len() {
            return Err(shape(format!(
                "{} bias entries for {} outputs",
                layer.bias.len(),
                layer.outputs.len()
            )));
        }

        let mut stmts = Vec::with_capacity(layer.outputs.len());
        let mut produced = Vec::with_capacity(layer.outputs.len());
        for (row, name) in layer.outputs.iter().enumerate() {
            let weights = &layer.weights[row];
            if weights.len() != previous.len() {
                return Err(shape(format!(
                    "row {} has {} weights for {} previous-layer variables",
                    row,
                    weights.len(),
                    previous.len()
                )));
            }
            let var = declare(name)?;
            let mut expr = LinExpr::constant(layer.bias.get(row).copied().unwrap_or(0.0));
            for (column, weight) in weights.iter().enumerate() {
                if *weight != 0.0 {
                    expr.set_term(previous[column].clone(), *weight);
                }
            }
            stmts.push((var.clone(), expr));
            produced.push(var);
        }
        builder.assign(stmts);
        if layer.relu {
            for var in &produced {
                activations.insert(builder.relu(var.clone()));
            }
        }
        previous = produced;
    }

    Ok(Network {
        cfg: builder.build(),
        inputs: inputs.into_iter().collect(),
        outputs: previous.into_iter().collect(),
        activations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NetworkFile {
        toml::from_str(
            r#"
            inputs = ["s01", "s02", "x01"]

            [[layer]]
            outputs = ["h1", "h2"]
            weights = [[0.0, 1.0, -0.5], [1.0, 0.0, 0.5]]
            bias = [0.1, -0.1]
            relu = true

            [[layer]]
            outputs = ["o1", "o2"]
            weights = [[1.0, 0.0], [0.0, 1.0]]
            "#,
        )
        .expect("sample network parses")
    }

    #[test]
    fn builds_the_expected_chain() {
        let network = build(sample()).unwrap();
        // Entry, layer, two activations, output layer.
        assert_eq!(network.cfg.len(), 5);
        assert_eq!(network.activations.len(), 2);
        assert_eq!(network.inputs.len(), 3);
        assert_eq!(
            network.outputs,
            BTreeSet::from([Variable::new("o1"), Variable::new("o2")])
        );
    }

    #[test]
    fn omitted_bias_is_zero() {
        let network = build(sample()).unwrap();
        let kinds: Vec<_> = network.cfg.ids().map(|id| network.cfg.node(id).clone()).collect();
        let core_cfg::NodeKind::Assign(stmts) = &kinds[4] else {
            panic!("expected the output layer at the chain end");
        };
        assert_eq!(stmts[0].1.constant_part(), 0.0);
    }

    #[test]
    fn weight_row_mismatch_is_rejected() {
        let mut file = sample();
        file.layers[0].weights[0].pop();
        let err = build(file).unwrap_err();
        assert!(matches!(err, NetworkError::Shape { layer: 0, .. }));
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let mut file = sample();
        file.layers[1].outputs[0] = "h1".to_string();
        let err = build(file).unwrap_err();
        assert!(matches!(err, NetworkError::Duplicate { .. }));
    }

    #[test]
    fn empty_network_is_rejected() {
        let file: NetworkFile = toml::from_str("inputs = [\"x\"]\n").unwrap();
        assert!(matches!(build(file).unwrap_err(), NetworkError::NoLayers));
    }

    #[test]
    fn load_reads_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("net.toml");
        std::fs::write(
            &path,
            "inputs = [\"x\"]\n\n[[layer]]\noutputs = [\"o\"]\nweights = [[1.0]]\n",
        )
        .unwrap();
        let network = load(&path).unwrap();
        assert_eq!(network.cfg.len(), 2);
        assert!(network.activations.is_empty());
    }
}

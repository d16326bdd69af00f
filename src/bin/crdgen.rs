// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! CRD YAML Generator
//!
//! Generates the Kubernetes CRD YAML files of the `ingress.v3.haproxy.org` resources
//! from the Rust types defined in src/crd.rs.
//!
//! Usage:
//!   cargo run --bin crdgen [output-dir]
//!
//! Files are written to `deploy/crds/` unless another directory is given; `-` prints every
//! definition to stdout as one multi-document stream.

use anyhow::{Context, Result};
use haproxy_ingress::crd::{Backend, Defaults, Frontend, Global, LogTargets, TCP};
use kube::CustomResourceExt;
use std::fs;
use std::path::Path;

const COPYRIGHT_HEADER: &str = "# Copyright (c) 2025 Erick Bourgeois, firestoned
# SPDX-License-Identifier: MIT
#
# This file is AUTO-GENERATED from src/crd.rs
# DO NOT EDIT MANUALLY - Run `cargo run --bin crdgen` to regenerate
#
";

fn main() -> Result<()> {
    let target = std::env::args().nth(1).unwrap_or_else(|| "deploy/crds".to_string());

    let crds = [
        ("backends.crd.yaml", render::<Backend>()?),
        ("defaults.crd.yaml", render::<Defaults>()?),
        ("globals.crd.yaml", render::<Global>()?),
        ("logtargets.crd.yaml", render::<LogTargets>()?),
        ("frontends.crd.yaml", render::<Frontend>()?),
        ("tcps.crd.yaml", render::<TCP>()?),
    ];

    if target == "-" {
        print!("{COPYRIGHT_HEADER}");
        for (_, yaml) in &crds {
            print!("---\n{yaml}");
        }
        return Ok(());
    }

    let output_dir = Path::new(&target);
    fs::create_dir_all(output_dir)
        .with_context(|| format!("cannot create {}", output_dir.display()))?;

    println!("Generating CRD YAML files from src/crd.rs...");
    for (filename, yaml) in &crds {
        let output_path = output_dir.join(filename);
        fs::write(&output_path, format!("{COPYRIGHT_HEADER}{yaml}"))
            .with_context(|| format!("cannot write {}", output_path.display()))?;
        println!("  ✓ Generated {filename}");
    }

    println!("✓ Successfully generated CRD YAML files in {target}/");
    println!("\nNext steps:");
    println!("  1. Review the generated files");
    println!("  2. Deploy with: kubectl apply -f {target}/");

    Ok(())
}

fn render<T: CustomResourceExt>() -> Result<String> {
    serde_yaml::to_string(&T::crd()).context("cannot serialize CRD")
}

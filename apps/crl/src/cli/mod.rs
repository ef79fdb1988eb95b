//! # CRL CLI Module
//!
//! This module implements the CLI interface for CRL.
//!
//! ## Available Commands
//!
//! - `init` - Create a working file holding an empty workspace
//! - `status` - Show concept counts
//! - `add` - Create a concept under the workspace
//! - `label` - Relabel a concept
//! - `link` - Point a Reference at a concept
//! - `refine` - Create a Refinement between two concepts
//! - `tree` - Print the ownership tree
//! - `show` - Show one concept
//! - `delete` - Delete a concept and everything it owns
//! - `verify` - Check index consistency
//! - `export` - Write the concept space to a file
//! - `import` - Replace the working file with a validated concept space

mod commands;

use crate::config::CrlConfig;
use clap::{Parser, Subcommand, ValueEnum};
use crl_core::{ConceptId, ConceptType, CrlError};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// CRL - concept spaces from the command line
///
/// Every command works on a single JSON working file holding one concept
/// space rooted at a "Workspace" element.
#[derive(Parser, Debug)]
#[command(name = "crl")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress informational output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to the working file [default: universe.json]
    #[arg(short = 'f', long, global = true)]
    pub file: Option<PathBuf>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Path to a TOML configuration file
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new working file
    Init {
        /// Overwrite an existing working file
        #[arg(long)]
        force: bool,
    },

    /// Show concept counts
    Status,

    /// Create a concept
    Add {
        /// Kind of concept to create
        #[arg(value_enum)]
        kind: ConceptKindArg,

        /// Label of the new concept
        #[arg(short, long)]
        label: Option<String>,

        /// Owner of the new concept [default: the workspace root]
        #[arg(short, long)]
        owner: Option<ConceptId>,

        /// URI naming the new concept
        #[arg(short, long)]
        uri: Option<String>,

        /// Value of a new literal
        #[arg(long)]
        value: Option<String>,
    },

    /// Change the label of a concept
    Label {
        /// Concept to relabel
        id: ConceptId,

        /// New label
        label: String,
    },

    /// Point a reference at a concept
    Link {
        /// The reference
        #[arg(short, long)]
        reference: ConceptId,

        /// The concept it should point at
        #[arg(short, long)]
        target: ConceptId,

        /// Attribute of the target (e.g. Label, LiteralValue)
        #[arg(short, long, default_value = "NoAttribute")]
        attribute: String,
    },

    /// Create a refinement from an abstract concept to a refined one
    Refine {
        /// The abstract concept
        #[arg(short = 'a', long = "abstract")]
        abstract_concept: ConceptId,

        /// The refined concept
        #[arg(short, long)]
        refined: ConceptId,

        /// Owner of the refinement [default: the refined concept]
        #[arg(short, long)]
        owner: Option<ConceptId>,
    },

    /// Print the ownership tree
    Tree,

    /// Show one concept
    Show {
        /// Concept to show
        id: ConceptId,
    },

    /// Delete a concept and everything it owns
    Delete {
        /// Concept to delete
        id: ConceptId,
    },

    /// Check that the indexes agree with the concepts
    Verify,

    /// Export the concept space as JSON
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Replace the working file with an imported concept space
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

/// Concept kinds accepted by `add`.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConceptKindArg {
    Element,
    Literal,
    Reference,
    Refinement,
}

impl From<ConceptKindArg> for ConceptType {
    fn from(kind: ConceptKindArg) -> Self {
        match kind {
            ConceptKindArg::Element => Self::Element,
            ConceptKindArg::Literal => Self::Literal,
            ConceptKindArg::Reference => Self::Reference,
            ConceptKindArg::Refinement => Self::Refinement,
        }
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub fn execute(cli: Cli, config: &CrlConfig) -> Result<(), CrlError> {
    let ctx = Context {
        file: config.working_file(cli.file.as_deref()),
        json_mode: cli.json_mode,
        quiet: cli.quiet,
        record_undo: config.record_undo,
    };
    tracing::debug!(file = %ctx.file.display(), "working file");

    match cli.command {
        Some(Commands::Init { force }) => cmd_init(&ctx, force),
        Some(Commands::Status) | None => cmd_status(&ctx),
        Some(Commands::Add {
            kind,
            label,
            owner,
            uri,
            value,
        }) => cmd_add(
            &ctx,
            &NewConcept {
                concept_type: kind.into(),
                label,
                owner,
                uri,
                value,
            },
        )
        .map(|_| ()),
        Some(Commands::Label { id, label }) => cmd_label(&ctx, &id, &label),
        Some(Commands::Link {
            reference,
            target,
            attribute,
        }) => cmd_link(&ctx, &reference, &target, &attribute.parse()?),
        Some(Commands::Refine {
            abstract_concept,
            refined,
            owner,
        }) => cmd_refine(&ctx, &abstract_concept, &refined, owner).map(|_| ()),
        Some(Commands::Tree) => cmd_tree(&ctx),
        Some(Commands::Show { id }) => cmd_show(&ctx, &id),
        Some(Commands::Delete { id }) => cmd_delete(&ctx, &id),
        Some(Commands::Verify) => cmd_verify(&ctx),
        Some(Commands::Export { output }) => cmd_export(&ctx, &output),
        Some(Commands::Import { input }) => cmd_import(&ctx, &input),
    }
}

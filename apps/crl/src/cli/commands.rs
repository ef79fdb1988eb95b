//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands, plus the
//! [`Workspace`] they all operate on.

use crl_core::{
    AttributeName, Concept, ConceptId, ConceptRecord, ConceptType, CrlError,
    MAX_PERSISTENCE_PAYLOAD_SIZE, Transaction, Universe,
};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Label given to the root of a fresh workspace.
pub const WORKSPACE_LABEL: &str = "Workspace";

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum size of a working or imported file.
///
/// Matches the largest payload the recovery code accepts.
const MAX_IMPORT_FILE_SIZE: u64 = MAX_PERSISTENCE_PAYLOAD_SIZE as u64;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CrlError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CrlError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CrlError::Serialization(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path to an existing regular file.
///
/// Canonicalizing resolves ".." and symlinks before anything is read.
fn validate_file_path(path: &Path) -> Result<PathBuf, CrlError> {
    let canonical = path.canonicalize().map_err(|e| {
        CrlError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CrlError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: its parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, CrlError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CrlError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CrlError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CrlError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_concept_space(path: &Path) -> Result<String, CrlError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, MAX_IMPORT_FILE_SIZE)?;
    std::fs::read_to_string(&validated)
        .map_err(|e| CrlError::Io(format!("Read {}: {}", validated.display(), e)))
}

fn write_file(path: &Path, data: &str) -> Result<PathBuf, CrlError> {
    let validated = validate_output_path(path)?;
    std::fs::write(&validated, data)
        .map_err(|e| CrlError::Io(format!("Write {}: {}", validated.display(), e)))?;
    Ok(validated)
}

fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_default()
    );
}

// =============================================================================
// COMMAND CONTEXT
// =============================================================================

/// Settings shared by every command.
#[derive(Debug, Clone)]
pub struct Context {
    /// The working file.
    pub file: PathBuf,
    pub json_mode: bool,
    pub quiet: bool,
    /// Roll back the partial edits of a command that fails.
    pub record_undo: bool,
}

impl Context {
    /// Whether human-readable output should be printed.
    const fn chatty(&self) -> bool {
        !self.json_mode && !self.quiet
    }
}

/// Arguments of `add`.
#[derive(Debug, Clone)]
pub struct NewConcept {
    pub concept_type: ConceptType,
    pub label: Option<String>,
    pub owner: Option<ConceptId>,
    pub uri: Option<String>,
    pub value: Option<String>,
}

// =============================================================================
// WORKSPACE
// =============================================================================

/// A Universe holding the single concept space stored in a working file.
#[derive(Debug)]
pub struct Workspace {
    universe: Universe,
    root: ConceptId,
}

impl Workspace {
    /// A fresh workspace: one root Element labelled "Workspace".
    pub fn create() -> Result<Self, CrlError> {
        let universe = Universe::new();
        let root = {
            let trans = universe.new_transaction();
            let root = universe.new_element(None, &trans)?;
            universe.set_label(&root, WORKSPACE_LABEL, &trans)?;
            root
        };
        Ok(Self { universe, root })
    }

    /// Recover a workspace from concept space JSON.
    pub fn from_json(json: &str) -> Result<Self, CrlError> {
        let universe = Universe::new();
        let root = {
            let trans = universe.new_transaction();
            universe.recover_concept_space(json, &trans)?
        };
        Ok(Self { universe, root })
    }

    /// Load the working file.
    pub fn load(path: &Path) -> Result<Self, CrlError> {
        let json = read_concept_space(path)?;
        let workspace = Self::from_json(&json)?;
        tracing::debug!(
            path = %path.display(),
            concepts = workspace.member_count(),
            "workspace loaded"
        );
        Ok(workspace)
    }

    pub fn to_json(&self) -> Result<String, CrlError> {
        let trans = self.universe.new_transaction();
        self.universe.marshal_concept_space(&self.root, &trans)
    }

    /// Write the workspace to `path`.
    pub fn save(&self, path: &Path) -> Result<PathBuf, CrlError> {
        let written = write_file(path, &self.to_json()?)?;
        tracing::debug!(path = %written.display(), "workspace saved");
        Ok(written)
    }

    #[must_use]
    pub const fn universe(&self) -> &Universe {
        &self.universe
    }

    #[must_use]
    pub const fn root(&self) -> ConceptId {
        self.root
    }

    /// Whether `id` is the root or one of its descendants.
    #[must_use]
    pub fn is_member(&self, id: &ConceptId) -> bool {
        *id == self.root || self.universe.descendant_ids(&self.root).contains(id)
    }

    /// Number of concepts stored in the working file.
    #[must_use]
    pub fn member_count(&self) -> usize {
        self.universe.descendant_ids(&self.root).len() + 1
    }

    fn ensure_member(&self, id: &ConceptId) -> Result<(), CrlError> {
        if self.is_member(id) {
            Ok(())
        } else {
            Err(CrlError::NotFound(*id))
        }
    }

    /// A snapshot of any concept in the Universe, core concepts included.
    pub fn concept(&self, id: &ConceptId) -> Result<Concept, CrlError> {
        let trans = self.universe.new_transaction();
        self.universe
            .get_concept(id, &trans)
            .ok_or(CrlError::NotFound(*id))
    }

    /// Run one command's edits in a single transaction.
    ///
    /// With `record_undo`, a failure undoes whatever the edits had already
    /// applied before the error is returned.
    pub fn edit<R>(
        &self,
        record_undo: bool,
        f: impl FnOnce(&Universe, &Transaction<'_>) -> Result<R, CrlError>,
    ) -> Result<R, CrlError> {
        let uofd = &self.universe;
        uofd.set_recording_undo(record_undo);
        uofd.mark_undo_point();
        let result = {
            let trans = uofd.new_transaction();
            f(uofd, &trans)
        };

        if let Err(error) = &result {
            if record_undo {
                let trans = uofd.new_transaction();
                match uofd.undo(&trans) {
                    Ok(()) => tracing::warn!(%error, "edit failed, partial changes rolled back"),
                    Err(undo_error) => {
                        tracing::error!(%error, %undo_error, "edit failed and could not be rolled back");
                    }
                }
            }
        }
        result
    }
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Create a working file holding an empty workspace.
pub fn cmd_init(ctx: &Context, force: bool) -> Result<(), CrlError> {
    if ctx.file.exists() && !force {
        return Err(CrlError::Io(format!(
            "Working file '{}' already exists. Use --force to overwrite.",
            ctx.file.display()
        )));
    }

    let workspace = Workspace::create()?;
    let written = workspace.save(&ctx.file)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "file": written.to_string_lossy(),
            "root": workspace.root().to_string(),
        }));
    } else if !ctx.quiet {
        println!("Initialized workspace {} at {:?}", workspace.root(), written);
    }
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show concept counts.
pub fn cmd_status(ctx: &Context) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let uofd = workspace.universe();
    let trans = uofd.new_transaction();

    let roots = uofd.root_concept_ids(&trans).len();
    let core = uofd
        .concept_ids()
        .iter()
        .filter(|id| uofd.get_concept(id, &trans).is_some_and(|c| c.is_core()))
        .count();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "file": ctx.file.to_string_lossy(),
            "root": workspace.root().to_string(),
            "workspace_concepts": workspace.member_count(),
            "universe_concepts": uofd.concept_count(),
            "root_concepts": roots,
            "core_concepts": core,
        }));
        return Ok(());
    }

    println!("CRL Workspace Status");
    println!("====================");
    println!("File: {:?}", ctx.file);
    println!("Root: {}", workspace.root());
    println!();
    println!("Workspace Concepts: {}", workspace.member_count());
    println!("Universe Concepts:  {}", uofd.concept_count());
    println!("Root Concepts:      {}", roots);
    println!("Core Concepts:      {}", core);

    Ok(())
}

// =============================================================================
// EDIT COMMANDS
// =============================================================================

/// Create a concept under the workspace. Returns its identifier.
pub fn cmd_add(ctx: &Context, request: &NewConcept) -> Result<ConceptId, CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let owner = request.owner.unwrap_or_else(|| workspace.root());
    workspace.ensure_member(&owner)?;

    let id = workspace.edit(ctx.record_undo, |uofd, trans| {
        let id = uofd.new_concept(request.concept_type, request.uri.as_deref(), trans)?;
        uofd.set_owning_concept(&id, Some(owner), trans)?;
        if let Some(label) = &request.label {
            uofd.set_label(&id, label, trans)?;
        }
        if let Some(value) = &request.value {
            uofd.set_literal_value(&id, value, trans)?;
        }
        Ok(id)
    })?;
    workspace.save(&ctx.file)?;
    tracing::info!(%id, concept_type = %request.concept_type, "concept added");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "id": id.to_string(),
            "type": request.concept_type.as_str(),
            "owner": owner.to_string(),
        }));
    } else if !ctx.quiet {
        println!("Added {} {}", request.concept_type, id);
    }
    Ok(id)
}

/// Change the label of a workspace concept.
pub fn cmd_label(ctx: &Context, id: &ConceptId, label: &str) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    workspace.ensure_member(id)?;
    workspace.edit(ctx.record_undo, |uofd, trans| uofd.set_label(id, label, trans))?;
    workspace.save(&ctx.file)?;

    if ctx.chatty() {
        println!("Labelled {} {:?}", id, label);
    }
    Ok(())
}

/// Point a workspace Reference at a concept.
///
/// The target may be any concept in the Universe, core concepts included.
pub fn cmd_link(
    ctx: &Context,
    reference: &ConceptId,
    target: &ConceptId,
    attribute: &AttributeName,
) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    workspace.ensure_member(reference)?;
    if !workspace.universe().contains(target) {
        return Err(CrlError::NotFound(*target));
    }

    workspace.edit(ctx.record_undo, |uofd, trans| {
        uofd.set_referenced_concept(reference, Some(*target), *attribute, trans)
    })?;
    workspace.save(&ctx.file)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "reference": reference.to_string(),
            "target": target.to_string(),
            "attribute": attribute.as_str(),
        }));
    } else if !ctx.quiet {
        println!("Linked {} -> {} ({})", reference, target, attribute);
    }
    Ok(())
}

/// Create a Refinement from `abstract_id` to `refined`. Returns its identifier.
pub fn cmd_refine(
    ctx: &Context,
    abstract_id: &ConceptId,
    refined: &ConceptId,
    owner: Option<ConceptId>,
) -> Result<ConceptId, CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    workspace.ensure_member(refined)?;
    let owner = owner.unwrap_or(*refined);
    workspace.ensure_member(&owner)?;
    let abstract_label = workspace.concept(abstract_id)?.label().to_string();

    let id = workspace.edit(ctx.record_undo, |uofd, trans| {
        let id = uofd.new_refinement(None, trans)?;
        uofd.set_owning_concept(&id, Some(owner), trans)?;
        uofd.set_abstract_concept(&id, Some(*abstract_id), trans)?;
        uofd.set_refined_concept(&id, Some(*refined), trans)?;
        uofd.set_label(&id, &format!("Refines {}", abstract_label), trans)?;
        Ok(id)
    })?;
    workspace.save(&ctx.file)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "id": id.to_string(),
            "abstract": abstract_id.to_string(),
            "refined": refined.to_string(),
        }));
    } else if !ctx.quiet {
        println!("Added Refinement {}", id);
    }
    Ok(id)
}

/// Delete a workspace concept and everything it owns.
pub fn cmd_delete(ctx: &Context, id: &ConceptId) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    if *id == workspace.root() {
        return Err(CrlError::NotEditable(*id));
    }
    workspace.ensure_member(id)?;
    let removed = workspace.universe().descendant_ids(id).len() + 1;

    workspace.edit(ctx.record_undo, |uofd, trans| uofd.delete_concept(id, trans))?;
    workspace.save(&ctx.file)?;
    tracing::info!(%id, removed, "concept deleted");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "deleted": id.to_string(),
            "removed": removed,
        }));
    } else if !ctx.quiet {
        println!("Deleted {} ({} concepts)", id, removed);
    }
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

fn by_label(a: &Concept, b: &Concept) -> Ordering {
    a.label().cmp(b.label()).then_with(|| a.id().cmp(&b.id()))
}

fn children_of(uofd: &Universe, id: &ConceptId, trans: &Transaction<'_>) -> Vec<Concept> {
    let mut children: Vec<Concept> = uofd
        .owned_concept_ids(id)
        .iter()
        .filter_map(|child| uofd.get_concept(child, trans))
        .collect();
    children.sort_by(by_label);
    children
}

fn tree_json(uofd: &Universe, concept: &Concept, trans: &Transaction<'_>) -> serde_json::Value {
    let children: Vec<serde_json::Value> = children_of(uofd, &concept.id(), trans)
        .iter()
        .map(|child| tree_json(uofd, child, trans))
        .collect();
    serde_json::json!({
        "id": concept.id().to_string(),
        "type": concept.concept_type().as_str(),
        "label": concept.label(),
        "children": children,
    })
}

fn print_tree(uofd: &Universe, concept: &Concept, depth: usize, trans: &Transaction<'_>) {
    let value = concept
        .literal_value()
        .map(|v| format!(" = {:?}", v))
        .unwrap_or_default();
    println!(
        "{}{} [{}] {}{}",
        "  ".repeat(depth),
        concept.label(),
        concept.concept_type(),
        concept.id(),
        value
    );
    for child in children_of(uofd, &concept.id(), trans) {
        print_tree(uofd, &child, depth + 1, trans);
    }
}

/// Print the ownership tree under the workspace root.
pub fn cmd_tree(ctx: &Context) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let uofd = workspace.universe();
    let trans = uofd.new_transaction();
    let root = uofd
        .get_concept(&workspace.root(), &trans)
        .ok_or(CrlError::NotFound(workspace.root()))?;

    if ctx.json_mode {
        print_json(&tree_json(uofd, &root, &trans));
    } else {
        print_tree(uofd, &root, 0, &trans);
    }
    Ok(())
}

/// Show one concept in its persisted form.
pub fn cmd_show(ctx: &Context, id: &ConceptId) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let concept = workspace.concept(id)?;
    let record = serde_json::to_value(ConceptRecord::from_concept(&concept))?;
    let owned = workspace.universe().owned_concept_ids(id).len();
    let listeners = workspace.universe().listener_ids(id).len();

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "concept": record,
            "owned": owned,
            "listeners": listeners,
        }));
        return Ok(());
    }

    println!("{} {}", concept.concept_type(), id);
    if let serde_json::Value::Object(fields) = record {
        for (key, value) in fields {
            if let Some(text) = value.as_str().filter(|t| !t.is_empty()) {
                println!("  {:<24} {}", key, text);
            }
        }
    }
    println!("  {:<24} {}", "Owned", owned);
    println!("  {:<24} {}", "Listeners", listeners);
    Ok(())
}

/// Check the indexes of the loaded workspace.
///
/// Pointers to concepts outside the Universe are reported but are not an
/// error; they resolve when their targets are recovered.
pub fn cmd_verify(ctx: &Context) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let uofd = workspace.universe();
    {
        let trans = uofd.new_transaction();
        uofd.verify_indexes(&trans)?;
    }
    let dangling: usize = uofd
        .pending_edges()
        .iter()
        .map(|(_, holders)| holders.len())
        .sum();
    if dangling > 0 {
        tracing::warn!(dangling, "pointers to concepts outside the universe");
    }

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "consistent": true,
            "concepts": workspace.member_count(),
            "dangling_pointers": dangling,
        }));
    } else if !ctx.quiet {
        println!(
            "OK: {} concepts, {} dangling pointers",
            workspace.member_count(),
            dangling
        );
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Write the workspace concept space to `output`.
pub fn cmd_export(ctx: &Context, output: &Path) -> Result<(), CrlError> {
    let workspace = Workspace::load(&ctx.file)?;
    let json = workspace.to_json()?;
    let written = write_file(output, &json)?;

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "output": written.to_string_lossy(),
            "bytes": json.len(),
            "concepts": workspace.member_count(),
        }));
    } else if !ctx.quiet {
        println!("Exported {} bytes to {:?}", json.len(), written);
    }
    Ok(())
}

/// Replace the working file with the concept space in `input`.
///
/// The import is recovered into a fresh Universe and checked before the
/// working file is touched.
pub fn cmd_import(ctx: &Context, input: &Path) -> Result<(), CrlError> {
    let json = read_concept_space(input)?;
    let workspace = Workspace::from_json(&json)?;
    {
        let trans = workspace.universe().new_transaction();
        workspace.universe().verify_indexes(&trans)?;
    }
    let written = workspace.save(&ctx.file)?;
    tracing::info!(concepts = workspace.member_count(), "concept space imported");

    if ctx.json_mode {
        print_json(&serde_json::json!({
            "file": written.to_string_lossy(),
            "root": workspace.root().to_string(),
            "concepts": workspace.member_count(),
        }));
    } else if !ctx.quiet {
        println!(
            "Imported {} concepts into {:?}",
            workspace.member_count(),
            written
        );
    }
    Ok(())
}

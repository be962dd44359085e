//! Core extraction pipeline shared by every front end.
//! No I/O beyond reading the project up front; no global state.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::connectivity::ConnectivityGraph;
use crate::geometry::COINCIDENCE_EPSILON;
use crate::hierarchy::{normalize_path, HierarchyResolver};
use crate::library::LibraryIndex;
use crate::naming::{NamingPolicy, NetNamer};
use crate::parser::kicad::{ParseError, SchematicLoader, SourceText};
use crate::snapshot::{estimate_tokens, fingerprint, Extraction, SourceFile};
use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum NetsnapError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),
    #[error("Sheet cycle: {}", .chain.join(" -> "))]
    Cycle { chain: Vec<String> },
    #[error("{parent}: sheet file {file} is not part of the project")]
    MissingDocument { parent: String, file: String },
    #[error("Several root schematics: {}", .candidates.join(", "))]
    AmbiguousRoot { candidates: Vec<String> },
    #[error("No root schematic found")]
    NoRoot,
    #[error("Root schematic {root} is not part of the project")]
    UnknownRoot { root: String },
    #[error("Coincidence epsilon must be a positive finite number, got {epsilon}")]
    InvalidEpsilon { epsilon: f64 },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Snapshot store: {0}")]
    Store(#[from] StoreError),
}

impl NetsnapError {
    /// True for errors caused by the design itself rather than the environment.
    pub fn is_design_error(&self) -> bool {
        !matches!(
            self,
            NetsnapError::Io(_) | NetsnapError::Store(_) | NetsnapError::InvalidEpsilon { .. }
        )
    }
}

/// Options for extraction runs (CLI or library callers).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractOptions {
    /// Root document identifier; overrides root discovery.
    pub root: Option<String>,
    /// Coincidence tolerance in mm.
    pub epsilon: f64,
    pub naming: NamingPolicy,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            root: None,
            epsilon: COINCIDENCE_EPSILON,
            naming: NamingPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolLibrarySource {
    nickname: String,
    source: String,
    content: String,
}

/// Immutable input of one extraction: every document's content, captured
/// before hierarchy resolution starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProjectContext {
    documents: BTreeMap<String, String>,
    libraries: Vec<SymbolLibrarySource>,
    root_hint: Option<String>,
}

impl ProjectContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a schematic document under a project-relative identifier.
    pub fn with_source(mut self, id: &str, content: impl Into<String>) -> Self {
        self.documents.insert(normalize_path(id), content.into());
        self
    }

    /// Add an external `.kicad_sym` library whose symbols are `nickname:Name`.
    pub fn with_symbol_library(
        mut self,
        nickname: &str,
        source: &str,
        content: impl Into<String>,
    ) -> Self {
        self.libraries.push(SymbolLibrarySource {
            nickname: nickname.to_string(),
            source: source.to_string(),
            content: content.into(),
        });
        self
    }

    pub fn with_root_hint(mut self, root: &str) -> Self {
        self.root_hint = Some(normalize_path(root));
        self
    }

    /// Read every schematic below `dir`. A `.kicad_pro` next to a schematic
    /// of the same name marks that schematic as the root.
    pub fn load_dir(dir: &Path) -> Result<Self, NetsnapError> {
        let mut context = Self::new();
        for path in discover_schematic_files(dir)? {
            let content = std::fs::read_to_string(&path)?;
            context = context.with_source(&relative_id(dir, &path), content);
        }

        let mut projects: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("kicad_pro"))
            .collect();
        projects.sort();
        for project in projects {
            let schematic = project.with_extension("kicad_sch");
            if schematic.is_file() {
                context.root_hint = Some(relative_id(dir, &schematic));
                break;
            }
        }

        debug!(
            "loaded {} documents from {} (root hint: {:?})",
            context.documents.len(),
            dir.display(),
            context.root_hint
        );
        Ok(context)
    }

    /// Register a `.kicad_sym` file from disk.
    pub fn load_symbol_library(self, nickname: &str, path: &Path) -> Result<Self, NetsnapError> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.with_symbol_library(nickname, &path.to_string_lossy(), content))
    }

    pub fn documents(&self) -> impl Iterator<Item = (&str, &str)> {
        self.documents.iter().map(|(id, content)| (id.as_str(), content.as_str()))
    }

    pub fn root_hint(&self) -> Option<&str> {
        self.root_hint.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn relative_id(dir: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(dir).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

/// Recursively discover KiCAD schematic files in a directory, sorted.
pub fn discover_schematic_files(dir: &Path) -> Result<Vec<PathBuf>, NetsnapError> {
    let mut files = Vec::new();
    walk_dir(dir, &mut files, 0)?;
    files.sort();
    Ok(files)
}

fn walk_dir(dir: &Path, files: &mut Vec<PathBuf>, depth: usize) -> Result<(), NetsnapError> {
    if depth > 20 {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with('.') || name == "node_modules" || name == "target" || name == "build" {
                continue;
            }
            walk_dir(&path, files, depth + 1)?;
        } else if path.is_file() && path.extension().and_then(|s| s.to_str()) == Some("kicad_sch") {
            files.push(path);
        }
    }
    Ok(())
}

/// Extraction API used by both the CLI and library callers.
pub struct Netsnap;

impl Netsnap {
    /// Run the whole pipeline over an already captured project.
    pub fn extract(project: &ProjectContext, options: &ExtractOptions) -> Result<Extraction, NetsnapError> {
        if !(options.epsilon.is_finite() && options.epsilon > 0.0) {
            return Err(NetsnapError::InvalidEpsilon {
                epsilon: options.epsilon,
            });
        }

        // Step 1: tokenize every document once
        let mut trees = BTreeMap::new();
        for (id, content) in project.documents() {
            let src = SourceText::new(id, content);
            trees.insert(id, (src, SchematicLoader::parse_root(src, "kicad_sch")?));
        }

        // Step 2: library index from embedded symbols plus registered libraries
        let mut builder = LibraryIndex::builder();
        for (src, tree) in trees.values() {
            builder.add_schematic_tree(*src, tree)?;
        }
        for library in &project.libraries {
            builder.add_symbol_library(&library.nickname, &library.source, &library.content)?;
        }
        let library = builder.build();
        debug!("library index: {} symbols", library.len());

        // Step 3: typed documents
        let mut documents = BTreeMap::new();
        let mut load_warnings = BTreeMap::new();
        for (id, (src, tree)) in &trees {
            let loaded = SchematicLoader::load_tree(*src, tree, &library)?;
            load_warnings.insert(id.to_string(), loaded.warnings);
            documents.insert(id.to_string(), loaded.document);
        }

        // Step 4: flatten the hierarchy from the root
        let root = HierarchyResolver::find_root(&documents, options.root.as_deref(), project.root_hint())?;
        let design = HierarchyResolver::resolve(&root, &documents)?;
        let reachable = design.documents();

        let mut warnings: Vec<_> = reachable
            .iter()
            .filter_map(|id| load_warnings.remove(id))
            .flatten()
            .collect();
        warnings.extend(design.warnings.iter().cloned());

        // Step 5: connectivity and naming
        let clusters = ConnectivityGraph::build(&design, options.epsilon).clusters();
        let (nets, naming_warnings) = NetNamer::new(&options.naming).name(clusters);
        warnings.extend(naming_warnings);

        // Step 6: source fingerprints
        let mut sources: Vec<SourceFile> = reachable
            .iter()
            .filter_map(|id| {
                project.documents.get(id).map(|content| SourceFile {
                    document: id.clone(),
                    fingerprint: fingerprint(content.as_bytes()),
                    tokens: estimate_tokens(content),
                })
            })
            .chain(project.libraries.iter().map(|library| SourceFile {
                document: library.source.clone(),
                fingerprint: fingerprint(library.content.as_bytes()),
                tokens: estimate_tokens(&library.content),
            }))
            .collect();
        sources.sort_by(|a, b| a.document.cmp(&b.document));

        for warning in &warnings {
            warn!("{}", warning);
        }

        let components = design.components();
        debug!(
            "extracted {} components, {} nets from {}",
            components.len(),
            nets.len(),
            root
        );

        Ok(Extraction {
            root,
            components,
            nets,
            sources,
            warnings,
        })
    }

    /// Capture a project directory and extract it.
    pub fn extract_dir(dir: &Path, options: &ExtractOptions) -> Result<Extraction, NetsnapError> {
        let project = ProjectContext::load_dir(dir)?;
        Self::extract(&project, options)
    }
}

//! Mnemon CLI
//!
//! Thin command-line shell over the core memory operations.

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use mnemon::compaction::CompactionEngine;
use mnemon::config::{load_config, update_config, Config};
use mnemon::events::EventLog;
use mnemon::groups::GroupRegistry;
use mnemon::hook;
use mnemon::llm::summarizer_from_config;
use mnemon::prune::{PruneFilter, PruningEngine};
use mnemon::relevance::RelevanceEngine;
use mnemon::session::SessionManager;
use mnemon::store::MemoryStore;
use mnemon::types::{calculate_expiration, truncate_text, Category, SaveMemory, Scope};
use mnemon::vector::VectorStore;

#[derive(Parser)]
#[command(name = "mnemon")]
#[command(about = "Persistent memory store for AI coding agents")]
#[command(version)]
struct Cli {
    /// Storage base path
    #[arg(long, env = "AGENT_MEMORY_PATH")]
    base_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Save a new memory
    Save {
        /// Content to remember
        content: String,
        /// Category (auto-detected if omitted)
        #[arg(short, long)]
        category: Option<String>,
        /// Scope: project, group, or global
        #[arg(short, long, default_value = "project")]
        scope: String,
        /// Pin the memory into startup context
        #[arg(short, long)]
        pin: bool,
        /// Groups for group scope (comma-separated)
        #[arg(short, long)]
        groups: Option<String>,
    },
    /// Search memories by keyword and similarity
    Search {
        /// Search query
        query: String,
        /// Maximum results
        #[arg(short, long, default_value = "10")]
        limit: usize,
        /// Include stored descendant projects
        #[arg(long)]
        descendants: bool,
        /// Search every tracked project
        #[arg(long)]
        all_projects: bool,
    },
    /// List memories
    List {
        /// Scope: project, group, or global
        #[arg(short, long, default_value = "project")]
        scope: String,
        /// Filter by category
        #[arg(short, long)]
        category: Option<String>,
        /// Pinned memories only
        #[arg(short, long)]
        pinned: bool,
        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
        /// Include stored descendant projects
        #[arg(long)]
        descendants: bool,
    },
    /// Show a memory by id
    Get {
        /// Memory id
        id: String,
    },
    /// Pin a memory into startup context
    Pin {
        id: String,
        #[arg(short, long, default_value = "project")]
        scope: String,
    },
    /// Unpin a memory
    Unpin {
        id: String,
        #[arg(short, long, default_value = "project")]
        scope: String,
    },
    /// Delete a memory by id or by matching query
    Forget {
        /// Memory id (or a query with --matching)
        target: String,
        /// Treat the target as a content query
        #[arg(long)]
        matching: bool,
        #[arg(short, long, default_value = "project")]
        scope: String,
    },
    /// Move a project memory to global scope or a group
    Promote {
        id: String,
        /// Promote into this group instead of global scope
        #[arg(long)]
        to_group: Option<String>,
        /// Source project (defaults to the current directory)
        #[arg(long)]
        from_project: Option<PathBuf>,
    },
    /// Move a global or group memory into a project
    Unpromote {
        id: String,
        /// Target project path
        #[arg(long)]
        to_project: PathBuf,
    },
    /// Workspace group management
    #[command(subcommand)]
    Group(GroupCommands),
    /// Session management
    #[command(subcommand)]
    Session(SessionCommands),
    /// Print startup context for the current project
    Startup {
        /// Output as JSON
        #[arg(long)]
        json: bool,
        /// Include group-shared memories: a group name, or "all"
        #[arg(long)]
        include_groups: Option<String>,
    },
    /// Cluster near-duplicate memories and replace them with summaries
    Compact {
        #[arg(short, long)]
        scope: Option<String>,
        #[arg(short, long)]
        category: Option<String>,
        /// Only memories older than this many days
        #[arg(long)]
        older_than: Option<i64>,
        /// Cosine similarity threshold for clustering
        #[arg(long, default_value = "0.85")]
        similarity: f32,
        /// Minimum memories per cluster
        #[arg(long, default_value = "3")]
        min_cluster: usize,
        /// Show clusters without replacing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Delete old or unused memories
    Prune {
        #[arg(short, long)]
        scope: Option<String>,
        /// Only memories older than this many days
        #[arg(long)]
        older_than: Option<i64>,
        /// Only memories never returned to a caller
        #[arg(long)]
        never_accessed: bool,
        #[arg(short, long)]
        category: Option<String>,
        /// Also prune pinned memories
        #[arg(long)]
        include_pinned: bool,
        /// Show candidates without deleting
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove expired memories
    Cleanup,
    /// Show usage analytics from the command log
    Usage {
        /// Time window in days
        #[arg(long, default_value = "30")]
        since: i64,
    },
    /// Show or change configuration
    #[command(subcommand)]
    Config(ConfigCommands),
    /// Agent integration hooks
    #[command(subcommand)]
    Hook(HookCommands),
}

#[derive(Subcommand)]
enum GroupCommands {
    /// Create a workspace group
    Create { name: String },
    /// Delete a workspace group
    Delete { name: String },
    /// List workspace groups
    List,
    /// Add the current (or given) project to a group
    Join {
        name: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Remove the current (or given) project from a group
    Leave {
        name: String,
        #[arg(long)]
        project: Option<PathBuf>,
    },
    /// Show one group's members and memories
    Show { name: String },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Start a new session
    Start,
    /// End the most recent session
    End,
    /// Record a session summary
    Summarize { content: String },
    /// List recent sessions
    List {
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Load summaries from the last session
    Load,
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Print the active configuration
    Show,
    /// Set a value by dotted key path, e.g. semantic.enabled=false
    Set { key_value: String },
}

#[derive(Subcommand)]
enum HookCommands {
    /// Scan tool output on stdin for error strings
    CheckError,
}

fn parse_scope(raw: &str) -> anyhow::Result<Scope> {
    raw.parse::<Scope>().map_err(anyhow::Error::msg)
}

fn parse_scope_opt(raw: &Option<String>) -> anyhow::Result<Option<Scope>> {
    raw.as_deref().map(parse_scope).transpose()
}

fn parse_category_opt(raw: &Option<String>) -> Option<Category> {
    raw.as_deref().and_then(|c| c.parse().ok())
}

fn current_project() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn print_memories(memories: &[mnemon::types::Memory]) {
    for memory in memories {
        let pin_mark = if memory.pinned { "*" } else { " " };
        println!(
            "{} {} [{}] {}",
            pin_mark,
            memory.id,
            memory.category.as_str(),
            truncate_text(&memory.content, 70)
        );
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let base_path = cli
        .base_path
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).into_owned()));
    let config = load_config(base_path).context("failed to load configuration")?;
    let project = current_project();
    let project_str = project.to_string_lossy().into_owned();
    let events = EventLog::new(&config);

    let store = MemoryStore::new(config.clone(), Some(project.clone()));
    let vectors = VectorStore::from_config(config.clone(), Some(project.clone()));

    match cli.command {
        Commands::Save {
            content,
            category,
            scope,
            pin,
            groups,
        } => {
            let scope = parse_scope(&scope)?;
            let category = Category::normalize(category.as_deref(), &content);
            let groups: Vec<String> = groups
                .map(|g| g.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or_default();
            let expires_at = config
                .expiration
                .days_for(category.as_str())
                .and_then(|days| calculate_expiration(chrono::Utc::now(), Some(days)));

            let memory = store.save(SaveMemory {
                content,
                category: Some(category),
                scope,
                pinned: pin,
                groups: groups.clone(),
                expires_at,
                ..Default::default()
            })?;

            if vectors.is_enabled() {
                if let Err(err) =
                    vectors.add(&memory.id, &memory.content, memory.category, scope, &groups)
                {
                    tracing::warn!(error = %err, "vector mirror failed");
                }
            }

            events.log("save", None, Some(&project_str), None, None);
            println!("Saved {} [{}]", memory.id, memory.category.as_str());
        }

        Commands::Search {
            query,
            limit,
            descendants,
            all_projects,
        } => {
            if all_projects {
                for (path, memories) in store.search_all_projects(&query, limit, true) {
                    match path {
                        Some(path) => println!("── {}", path.display()),
                        None => println!("── global"),
                    }
                    print_memories(&memories);
                }
                return Ok(());
            }

            let engine = RelevanceEngine::new(config.clone(), store.clone(), Some(vectors.clone()));
            let memories = if descendants {
                store.search_with_descendants(&query, limit)?
            } else {
                let relevant = engine.get_relevant_memories(&query, None, Some(limit), None, false);
                let mut merged = Vec::new();
                let mut seen = std::collections::HashSet::new();
                for result in &relevant.semantic_results {
                    if let Some(memory) = store.get_by_id(&result.memory_id)? {
                        if seen.insert(memory.id.clone()) {
                            merged.push(memory);
                        }
                    }
                }
                for memory in relevant.keyword_results {
                    if seen.insert(memory.id.clone()) {
                        merged.push(memory);
                    }
                }
                merged
            };

            events.log(
                "search",
                None,
                Some(&project_str),
                Some(memories.len() as i64),
                None,
            );
            print_memories(&memories);

            let ids: Vec<String> = memories.iter().map(|m| m.id.clone()).collect();
            store.record_access_batch(&ids, Scope::Project);
        }

        Commands::List {
            scope,
            category,
            pinned,
            limit,
            descendants,
        } => {
            let scope = parse_scope(&scope)?;
            let category = parse_category_opt(&category);
            let memories = if descendants {
                store.list_with_descendants(category, pinned, limit)?
            } else {
                store.list(scope, category, pinned, limit, false)?
            };
            events.log(
                "list",
                None,
                Some(&project_str),
                Some(memories.len() as i64),
                None,
            );
            print_memories(&memories);
        }

        Commands::Get { id } => match store.get_by_id(&id)? {
            Some(memory) => {
                store.record_access(&memory.id, memory.scope);
                println!("{}", serde_json::to_string_pretty(&memory)?);
            }
            None => println!("Memory not found: {}", id),
        },

        Commands::Pin { id, scope } => {
            let scope = parse_scope(&scope)?;
            match store.pin(&id, scope)? {
                Some(memory) => println!("Pinned {}", memory.id),
                None => println!("Memory not found: {}", id),
            }
        }

        Commands::Unpin { id, scope } => {
            let scope = parse_scope(&scope)?;
            match store.unpin(&id, scope)? {
                Some(memory) => println!("Unpinned {}", memory.id),
                None => println!("Memory not found: {}", id),
            }
        }

        Commands::Forget {
            target,
            matching,
            scope,
        } => {
            let scope = parse_scope(&scope)?;
            if matching {
                let matched = store.search_keyword(&target, scope, 10_000)?;
                let removed = store.delete_matching(&target, scope)?;
                for memory in &matched {
                    vectors.delete(&memory.id, scope);
                }
                println!("Deleted {} memories matching '{}'", removed, target);
            } else if store.delete_by_id(&target)? {
                vectors.delete_by_id(&target);
                println!("Deleted {}", target);
            } else {
                println!("Memory not found: {}", target);
            }
        }

        Commands::Promote {
            id,
            to_group,
            from_project,
        } => {
            match store.promote(&id, from_project.as_deref(), to_group.as_deref())? {
                Some(memory) => {
                    vectors.delete_by_id(&id);
                    if vectors.is_enabled() {
                        if let Err(err) = vectors.add(
                            &memory.id,
                            &memory.content,
                            memory.category,
                            memory.scope,
                            &memory.groups,
                        ) {
                            tracing::warn!(error = %err, "vector mirror failed");
                        }
                    }
                    println!("Promoted {} -> {} [{}]", id, memory.id, memory.scope);
                }
                None => println!("Memory not found in project scope: {}", id),
            }
        }

        Commands::Unpromote { id, to_project } => {
            match store.unpromote(&id, &to_project)? {
                Some(memory) => {
                    vectors.delete_by_id(&id);
                    println!("Moved {} -> {} into {}", id, memory.id, to_project.display());
                }
                None => println!("Memory not found in global scope: {}", id),
            }
        }

        Commands::Group(command) => run_group_command(command, &config, &store)?,

        Commands::Session(command) => {
            run_session_command(command, &config, &store, &vectors, &events, &project)?
        }

        Commands::Startup {
            json,
            include_groups,
        } => {
            let engine = RelevanceEngine::new(config.clone(), store.clone(), Some(vectors.clone()));
            let include: Option<Vec<String>> = include_groups.map(|g| vec![g]);
            let context = engine.get_startup_context(&project, include.as_deref());

            events.log("startup", None, Some(&project_str), None, None);

            if json {
                println!("{}", serde_json::to_string_pretty(&context)?);
            } else {
                if !context.pinned_memories.is_empty() {
                    println!("Pinned memories ({})", context.pinned_memories.len());
                    print_memories(&context.pinned_memories);
                }
                if !context.group_memories.is_empty() {
                    println!("Group memories ({})", context.group_memories.len());
                    print_memories(&context.group_memories);
                }
                if context.has_previous_session {
                    println!(
                        "Previous session: {}",
                        context.previous_session_id.as_deref().unwrap_or("unknown")
                    );
                    if !context.previous_session_summaries.is_empty() {
                        println!("  Load with: mnemon session load");
                    }
                }
            }
        }

        Commands::Compact {
            scope,
            category,
            older_than,
            similarity,
            min_cluster,
            dry_run,
        } => {
            let scope = parse_scope_opt(&scope)?;
            let category = parse_category_opt(&category);
            let summarizer = summarizer_from_config(&config)
                .context("compaction requires an LLM provider (enable the remote feature and configure llm.*)")?;
            let engine = CompactionEngine::new(store.clone(), vectors.clone(), summarizer);

            if dry_run {
                let clusters =
                    engine.find_clusters(scope, category, older_than, similarity, min_cluster)?;
                let summary = engine.get_cluster_summary(&clusters);
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            let target_scope = scope.unwrap_or(Scope::Project);
            let report = engine.compact(
                scope,
                category,
                older_than,
                similarity,
                min_cluster,
                target_scope,
                &[],
            )?;

            events.log(
                "compact",
                None,
                Some(&project_str),
                Some(report.compacted.len() as i64),
                None,
            );
            println!(
                "Compacted {} of {} clusters",
                report.compacted.len(),
                report.clusters_found
            );
            for cluster in &report.compacted {
                println!(
                    "  {} replaces {}",
                    cluster.memory.id,
                    cluster.replaced_ids.join(", ")
                );
            }
            if let Some(error) = report.error {
                println!("Aborted early: {}", error);
            }
        }

        Commands::Prune {
            scope,
            older_than,
            never_accessed,
            category,
            include_pinned,
            dry_run,
        } => {
            let filter = PruneFilter {
                scope: parse_scope_opt(&scope)?,
                older_than_days: older_than,
                never_accessed,
                category: parse_category_opt(&category),
                exclude_pinned: !include_pinned,
            };
            let engine = PruningEngine::new(store.clone(), Some(vectors.clone()));
            let candidates = engine.find_candidates(&filter);

            if dry_run {
                let summary = engine.get_prune_summary(&candidates);
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            let deleted = engine.prune(&candidates);
            events.log(
                "prune",
                None,
                Some(&project_str),
                Some(deleted as i64),
                None,
            );
            println!("Pruned {} memories", deleted);
        }

        Commands::Cleanup => {
            let project_removed = store.cleanup_expired(Scope::Project)?;
            let global_removed = store.cleanup_expired(Scope::Global)?;
            println!(
                "Removed {} expired memories ({} project, {} global)",
                project_removed + global_removed,
                project_removed,
                global_removed
            );
        }

        Commands::Usage { since } => {
            let counts = events.get_command_counts(since);
            let search = events.get_search_stats(since);
            let sessions = events.get_session_stats(since);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "command_counts": counts,
                    "search": search,
                    "sessions": sessions,
                }))?
            );
        }

        Commands::Config(command) => match command {
            ConfigCommands::Show => {
                println!("{}", serde_yaml::to_string(&config)?);
            }
            ConfigCommands::Set { key_value } => {
                let (key, value) = key_value
                    .split_once('=')
                    .context("expected key=value, e.g. semantic.enabled=false")?;
                update_config(&config, key.trim(), value.trim())?;
                println!("Set {} = {}", key.trim(), value.trim());
            }
        },

        Commands::Hook(HookCommands::CheckError) => {
            let mut raw = String::new();
            std::io::stdin().read_to_string(&mut raw).ok();
            let input = hook::HookInput::from_stdin_text(&raw);
            if hook::should_nudge(&config, &input.output()) {
                println!("{}", hook::nudge_message());
            }
        }
    }

    Ok(())
}

fn run_group_command(
    command: GroupCommands,
    config: &Config,
    store: &MemoryStore,
) -> anyhow::Result<()> {
    let registry = GroupRegistry::new(config);
    match command {
        GroupCommands::Create { name } => {
            registry.create(&name)?;
            println!("Created group '{}'", name);
        }
        GroupCommands::Delete { name } => {
            if registry.delete(&name)? {
                println!("Deleted group '{}'", name);
            } else {
                println!("Group not found: {}", name);
            }
        }
        GroupCommands::List => {
            for group in registry.list() {
                println!("{} ({} projects)", group.name, group.projects.len());
            }
        }
        GroupCommands::Join { name, project } => {
            let project = project.unwrap_or_else(current_project);
            let group = registry.add_project(&name, &project)?;
            println!("Added {} to '{}'", project.display(), group.name);
        }
        GroupCommands::Leave { name, project } => {
            let project = project.unwrap_or_else(current_project);
            let group = registry.remove_project(&name, &project)?;
            println!("Removed {} from '{}'", project.display(), group.name);
        }
        GroupCommands::Show { name } => match registry.get(&name) {
            Some(group) => {
                println!("{} (created {})", group.name, group.created_at.to_rfc3339());
                for project in &group.projects {
                    println!("  {}", project.display());
                }
                let memories = store.list_by_group(Some(&name), false, None, 20)?;
                if !memories.is_empty() {
                    println!("Memories:");
                    print_memories(&memories);
                }
            }
            None => println!("Group not found: {}", name),
        },
    }
    Ok(())
}

fn run_session_command(
    command: SessionCommands,
    config: &Config,
    store: &MemoryStore,
    vectors: &VectorStore,
    events: &EventLog,
    project: &std::path::Path,
) -> anyhow::Result<()> {
    let manager = SessionManager::new(
        config.clone(),
        store.clone(),
        Some(vectors.clone()),
        Some(project.to_path_buf()),
    );
    let project_str = project.to_string_lossy().into_owned();

    match command {
        SessionCommands::Start => {
            let session = manager.start_session(None)?;
            events.log("session", Some("start"), Some(&project_str), None, None);
            println!("Started session {}", session.id);
        }
        SessionCommands::End => {
            let last = manager.get_last_session().map(|s| s.id);
            match manager.end_session(last.as_deref())? {
                Some(session) => {
                    events.log("session", Some("end"), Some(&project_str), None, None);
                    println!("Ended session {}", session.id);
                }
                None => println!("No session to end"),
            }
        }
        SessionCommands::Summarize { content } => {
            let last = manager.get_last_session().map(|s| s.id);
            let memory = manager.add_summary(&content, last.as_deref(), None)?;
            events.log("session", Some("summarize"), Some(&project_str), None, None);
            println!("Recorded summary {}", memory.id);
        }
        SessionCommands::List { limit } => {
            for session in manager.list_sessions(limit) {
                let status = if session.ended_at.is_some() {
                    "ended"
                } else {
                    "open"
                };
                println!(
                    "{} {} [{}] {} summaries",
                    session.id,
                    session.started_at.to_rfc3339(),
                    status,
                    session.summary_count
                );
            }
        }
        SessionCommands::Load => {
            let summaries = manager.load_last_session_context()?;
            let ids: Vec<String> = summaries.iter().map(|m| m.id.clone()).collect();
            let mut metadata = HashMap::new();
            metadata.insert("loaded".to_string(), serde_json::json!(ids.len()));
            events.log(
                "session",
                Some("load"),
                Some(&project_str),
                Some(ids.len() as i64),
                Some(&metadata),
            );
            print_memories(&summaries);
            store.record_access_batch(&ids, Scope::Project);
        }
    }
    Ok(())
}

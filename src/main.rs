use anyhow::Result;
use clap::Parser;
use comet::cache::SuggestionCache;
use comet::config::Config;
use comet::generate::client::LlmClient;
use comet::generate::CommitGenerator;
use comet::git_ops;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(
    name = "comet",
    about = "AI-generated commit messages, grouped into logical commits",
    version
)]
struct Args {
    /// Path to the repository (defaults to current directory)
    #[arg(default_value = ".")]
    path: PathBuf,

    /// Include unstaged and untracked changes, not just the index
    #[arg(short, long)]
    all: bool,

    /// Stage and commit each accepted group
    #[arg(short, long)]
    commit: bool,

    /// Override the configured model for this run
    #[arg(long)]
    model: Option<String>,

    /// Print cache statistics after the run
    #[arg(long)]
    stats: bool,

    /// Prune expired cache entries and exit
    #[arg(long)]
    prune_cache: bool,

    /// Store the OpenRouter API key and exit
    #[arg(long)]
    setup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.setup {
        return setup_api_key();
    }

    let cache = Arc::new(SuggestionCache::new());
    if args.prune_cache {
        let removed = cache.prune_expired();
        println!("Pruned {} expired cache entries", removed);
        return Ok(());
    }
    // Routine maintenance; expired entries would read as misses anyway.
    cache.prune_expired();

    let path = args.path.canonicalize()?;
    let config = Config::load();
    let api_key = config.get_api_key().ok_or_else(|| {
        anyhow::anyhow!("No API key configured. Run 'comet --setup' to get started.")
    })?;

    eprintln!("Reading changes...");
    let records = git_ops::collect_changes(&path, args.all)?;
    if records.is_empty() {
        println!("Nothing to commit.");
        if !args.all {
            println!("Tip: pass --all to include unstaged and untracked files.");
        }
        return Ok(());
    }
    eprintln!("  {} changed file(s)", records.len());

    let model = args
        .model
        .unwrap_or_else(|| config.model_name().to_string());
    let generator = CommitGenerator::new(LlmClient::new(api_key), Arc::clone(&cache), model);

    eprintln!("Generating commit messages...");
    let response = generator.generate(&records, &path).await?;

    for (i, group) in response.groups.iter().enumerate() {
        println!();
        println!(
            "[{}] {} (confidence {:.2})",
            i + 1,
            group.suggestion.message,
            group.suggestion.confidence
        );
        if let Some(description) = &group.suggestion.description {
            println!("    {}", description);
        }
        for file in &group.files {
            println!("    - {}", file.display());
        }
    }

    if args.commit {
        println!();
        for group in &response.groups {
            if !confirm(&format!("Commit \"{}\"?", group.suggestion.message))? {
                continue;
            }
            git_ops::stage_files(&path, &group.files)?;
            let oid = git_ops::commit(&path, &group.suggestion.message)?;
            println!("  Committed {}", &oid[..8.min(oid.len())]);
        }
    }

    if let Some(usage) = &response.usage {
        eprintln!(
            "  {} tokens ({} prompt, {} completion), ${:.4}",
            usage.total_tokens,
            usage.prompt_tokens,
            usage.completion_tokens,
            usage.cost()
        );
    }

    if args.stats {
        let stats = generator.cache_stats();
        println!();
        println!(
            "Cache: {} entries in memory, {:.0}% hit rate ({} hits / {} misses)",
            stats.size,
            stats.hit_rate() * 100.0,
            stats.hits,
            stats.misses
        );
    }

    Ok(())
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(answer.trim().eq_ignore_ascii_case("y"))
}

fn setup_api_key() -> Result<()> {
    println!();
    println!("  comet uses OpenRouter for commit message generation.");
    println!("  1. Get an API key at: https://openrouter.ai/keys");
    println!("  2. Paste it below (saved in your system keychain)");
    println!();
    print!("  API Key: ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim().to_string();
    if key.is_empty() {
        anyhow::bail!("No API key provided");
    }
    if !Config::validate_api_key_format(&key) {
        println!("  Warning: key doesn't look like an OpenRouter key (should start with sk-)");
        println!("  Saving anyway...");
    }

    let config = Config::load();
    config.set_api_key(&key)?;
    config.save()?;
    println!("  API key saved. Config: {}", Config::config_location());
    Ok(())
}

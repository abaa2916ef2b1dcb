pub mod cli;
pub mod config;
pub mod content;
pub mod daemon;
pub mod github;
pub mod protocol;
pub mod schema;
pub mod types;
pub mod webhook;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

use crate::cli::Client;
use crate::content::images::ImageUpload;
use crate::content::markdown;
use crate::content::{ArticleInput, ArticleUpdate, MutationResult};

#[derive(Parser)]
#[command(
    name = "inkraft",
    about = "Git-backed Markdown CMS - articles and their index.json caches on GitHub"
)]
struct Cli {
    /// Path to cms.config.json (defaults to $INKRAFT_CONFIG, then ./cms.config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Daemon,

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// List article records
    List {
        /// Only this content directory
        directory: Option<String>,
    },

    /// Print an article as Markdown with front matter
    Show {
        directory: String,
        slug: String,
        /// Print only the article file's revision
        #[arg(long)]
        sha: bool,
    },

    /// Create an article from a Markdown file with front matter
    Create {
        directory: String,
        /// Free-text slug; sanitized by the daemon
        slug: String,
        file: PathBuf,
    },

    /// Replace an article, optionally moving it
    Update {
        directory: String,
        slug: String,
        file: PathBuf,
        /// Move the article to this directory
        #[arg(long)]
        to_directory: Option<String>,
        /// Rename the article to this slug
        #[arg(long)]
        to_slug: Option<String>,
        /// Revision the edit was based on (from `show --sha`); rejects the
        /// update if the article changed since
        #[arg(long)]
        sha: Option<String>,
    },

    /// Delete an article and everything in its folder
    Delete { directory: String, slug: String },

    /// Rescan a directory and rewrite its index.json
    Rebuild { directory: String },

    /// Article count per content directory
    Counts,

    /// Upload an image into an article folder
    UploadImage {
        directory: String,
        slug: String,
        file: PathBuf,
    },
}

fn main() {
    env_logger::init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Daemon => cmd_daemon(cli.config),
        Commands::Stop => cmd_stop(),
        Commands::Status => cmd_status(),
        Commands::List { directory } => cmd_list(directory.as_deref()),
        Commands::Show {
            directory,
            slug,
            sha,
        } => cmd_show(&directory, &slug, sha),
        Commands::Create {
            directory,
            slug,
            file,
        } => cmd_create(directory, slug, &file),
        Commands::Update {
            directory,
            slug,
            file,
            to_directory,
            to_slug,
            sha,
        } => cmd_update(directory, slug, &file, to_directory, to_slug, sha),
        Commands::Delete { directory, slug } => cmd_delete(&directory, &slug),
        Commands::Rebuild { directory } => cmd_rebuild(&directory),
        Commands::Counts => cmd_counts(),
        Commands::UploadImage {
            directory,
            slug,
            file,
        } => cmd_upload_image(directory, slug, &file),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        if e.to_string().contains("not running") {
            eprintln!();
            eprintln!("Hint: Start the daemon with: inkraft daemon");
        }
        std::process::exit(1);
    }
}

fn cmd_daemon(config: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let path = config::resolve_config_path(config);
    daemon::start(&path)?;
    Ok(())
}

fn cmd_stop() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    client.stop()?;
    println!("Daemon stopped");
    Ok(())
}

fn cmd_status() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let status = client.status()?;

    println!("InKraft Daemon Status");
    println!(
        "  Running:     {}",
        if status.running { "yes" } else { "no" }
    );
    println!("  Repository:  {} ({})", status.repository, status.branch);
    println!("  Content:     {}", status.directories.join(", "));
    println!("  Uptime:      {}", format_duration(status.uptime_secs));
    println!("  Version:     {} (pid {})", status.version, status.pid);

    Ok(())
}

fn cmd_list(directory: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let result = client.list(directory)?;

    if result.records.is_empty() {
        println!("No articles");
        return Ok(());
    }

    println!("{:<16} {:<32} {}", "DIRECTORY", "SLUG", "TITLE");
    println!("{}", "-".repeat(80));

    for record in result.records {
        let title = record
            .frontmatter
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("-");
        println!("{:<16} {:<32} {}", record.directory, record.slug, title);
    }

    Ok(())
}

fn cmd_show(directory: &str, slug: &str, sha: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let article = client.get(directory, slug)?;

    if sha {
        println!("{}", article.sha);
        return Ok(());
    }

    print!("{}", markdown::encode(&article.frontmatter, &article.body)?);
    Ok(())
}

/// Read a Markdown file with front matter into an article.
fn read_article(
    directory: String,
    slug: String,
    file: &Path,
) -> Result<ArticleInput, Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(file)
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;
    let document = markdown::decode(&text)?;

    Ok(ArticleInput {
        directory,
        slug,
        frontmatter: document.frontmatter,
        body: document.body,
    })
}

fn print_mutation(result: MutationResult, verb: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !result.success {
        return Err(result
            .error
            .unwrap_or_else(|| "request rejected".to_string())
            .into());
    }
    println!("{} {}", verb, result.slug.unwrap_or_default());
    Ok(())
}

fn cmd_create(
    directory: String,
    slug: String,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let input = read_article(directory, slug, file)?;

    let mut client = Client::connect()?;
    print_mutation(client.create(input)?, "Created")
}

fn cmd_update(
    directory: String,
    slug: String,
    file: &Path,
    to_directory: Option<String>,
    to_slug: Option<String>,
    sha: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let moving = to_directory.is_some() || to_slug.is_some();
    let article = read_article(
        to_directory.unwrap_or_else(|| directory.clone()),
        to_slug.unwrap_or_else(|| slug.clone()),
        file,
    )?;
    let update = ArticleUpdate {
        article,
        original_directory: moving.then_some(directory),
        original_slug: moving.then_some(slug),
        sha,
    };

    let mut client = Client::connect()?;
    print_mutation(client.update(update)?, "Updated")
}

fn cmd_delete(directory: &str, slug: &str) -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    print_mutation(client.delete(directory, slug)?, "Deleted")
}

fn cmd_rebuild(directory: &str) -> Result<(), Box<dyn std::error::Error>> {
    println!("Rebuilding {}...", directory);

    let mut client = Client::connect()?;
    let result = client.rebuild(directory)?;

    println!("Indexed {} articles in {}", result.count, result.directory);
    Ok(())
}

fn cmd_counts() -> Result<(), Box<dyn std::error::Error>> {
    let mut client = Client::connect()?;
    let result = client.counts()?;

    for count in result.counts {
        println!("{:<24} {:>6}", count.directory, count.count);
    }
    Ok(())
}

fn cmd_upload_image(
    directory: String,
    slug: String,
    file: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let file_name = file
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| format!("invalid image path: {}", file.display()))?
        .to_string();
    let mime_type = mime_type_for(file)
        .ok_or_else(|| format!("unsupported image type: {}", file.display()))?
        .to_string();
    let data = std::fs::read(file)
        .map_err(|e| format!("failed to read {}: {}", file.display(), e))?;

    let mut client = Client::connect()?;
    let result = client.upload_image(ImageUpload {
        directory,
        slug,
        file_name,
        mime_type,
        data,
    })?;

    if !result.uploaded {
        return Err(result
            .error
            .unwrap_or_else(|| "upload rejected".to_string())
            .into());
    }
    println!("Uploaded {}", result.image_url.unwrap_or_default());
    Ok(())
}

fn mime_type_for(file: &Path) -> Option<&'static str> {
    let ext = file.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "svg" => Some("image/svg+xml"),
        _ => None,
    }
}

fn format_duration(secs: u64) -> String {
    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else if secs < 86400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86400, (secs % 86400) / 3600)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(42), "42s");
        assert_eq!(format_duration(125), "2m 5s");
        assert_eq!(format_duration(7260), "2h 1m");
        assert_eq!(format_duration(90000), "1d 1h");
    }

    #[test]
    fn test_mime_type_for() {
        assert_eq!(mime_type_for(Path::new("a/Cover.PNG")), Some("image/png"));
        assert_eq!(mime_type_for(Path::new("a.jpeg")), Some("image/jpeg"));
        assert_eq!(mime_type_for(Path::new("notes.txt")), None);
        assert_eq!(mime_type_for(Path::new("noext")), None);
    }

    #[test]
    fn test_read_article_parses_front_matter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("post.md");
        std::fs::write(&path, "---\ntitle: Hello\n---\n# Hi\n").unwrap();

        let input = read_article("posts".to_string(), "Hello".to_string(), &path).unwrap();
        assert_eq!(input.frontmatter["title"], "Hello");
        assert_eq!(input.body, "# Hi\n");
    }
}

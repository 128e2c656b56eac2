use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use reqwest::multipart;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

const DEFAULT_API_URL: &str = "http://localhost:5000";
const SESSION_FILE: &str = ".session";

#[derive(Parser)]
#[command(name = "linkdrop")]
#[command(about = "Share files through download links that expire after an hour", long_about = None)]
struct Cli {
    #[arg(long, global = true, default_value = DEFAULT_API_URL, help = "Base URL of the file sharing backend")]
    api_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create a new account")]
    Register {
        #[arg(short, long, help = "Display name (2-50 characters)")]
        name: String,

        #[arg(short, long, help = "Email address")]
        email: String,

        #[arg(short, long, help = "Password (at least 6 characters)")]
        password: String,
    },

    #[command(about = "Log in to your account")]
    Login {
        #[arg(short, long, help = "Email address")]
        email: String,

        #[arg(short, long, help = "Password")]
        password: String,
    },

    #[command(about = "Forget the saved session")]
    Logout,

    #[command(about = "Upload a file and get a one-hour download link")]
    Upload {
        #[arg(short, long, help = "Path to the file")]
        file: String,
    },

    #[command(about = "Resolve a download link or file ID")]
    Download {
        #[arg(help = "File ID or full download link")]
        link: String,
    },

    #[command(about = "List your uploaded files")]
    List,
}

#[derive(Debug, Serialize, Deserialize)]
struct Session {
    token: String,
    name: String,
    email: String,
}

impl Session {
    fn save(&self) -> Result<()> {
        let json = serde_json::to_string(self)?;
        fs::write(SESSION_FILE, json).context("Failed to write session file")?;
        Ok(())
    }

    fn load() -> Option<Self> {
        if Path::new(SESSION_FILE).exists() {
            let data = fs::read_to_string(SESSION_FILE).ok()?;
            serde_json::from_str(&data).ok()
        } else {
            None
        }
    }

    fn clear() -> Result<()> {
        if Path::new(SESSION_FILE).exists() {
            fs::remove_file(SESSION_FILE)?;
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RegisterRequest {
    name: String,
    email: String,
    password: String,
}

#[derive(Debug, Serialize)]
struct LoginRequest {
    email: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct UserSummary {
    name: String,
    email: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    token: String,
    user: UserSummary,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadedFile {
    id: String,
    original_name: String,
    download_link: String,
    expiry_time: DateTime<Utc>,
    file_size: i64,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    file: UploadedFile,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DownloadResponse {
    #[serde(rename = "fileURL")]
    file_url: String,
    filename: String,
    download_count: i64,
    uploaded_by: String,
    expiry_time: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileSummary {
    id: String,
    original_name: String,
    download_count: i64,
    expiry_time: DateTime<Utc>,
    created_at: DateTime<Utc>,
    is_expired: bool,
}

#[derive(Debug, Deserialize)]
struct FileListResponse {
    files: Vec<FileSummary>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    message: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let api = cli.api_url.trim_end_matches('/').to_string();

    if let Err(e) = run_command(&api, cli.command).await {
        eprintln!("❌ Error: {}", e);
        std::process::exit(1);
    }
}

async fn run_command(api: &str, command: Commands) -> Result<()> {
    let client = reqwest::Client::new();

    match command {
        Commands::Register {
            name,
            email,
            password,
        } => register(&client, api, name, email, password).await,
        Commands::Login { email, password } => login(&client, api, email, password).await,
        Commands::Logout => {
            Session::clear()?;
            println!("✅ Logged out successfully!");
            Ok(())
        }
        Commands::Upload { file } => {
            let session = require_login()?;
            upload(&client, api, &session, &file).await
        }
        Commands::Download { link } => download(&client, api, &link).await,
        Commands::List => {
            let session = require_login()?;
            list_files(&client, api, &session).await
        }
    }
}

fn require_login() -> Result<Session> {
    match Session::load() {
        Some(session) => Ok(session),
        None => bail!("Not logged in. Run `linkdrop login -e <email> -p <password>` first"),
    }
}

/// Turn a non-2xx response into the server's message.
async fn check(response: reqwest::Response, action: &str) -> Result<reqwest::Response> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
    bail!("Failed to {} ({}): {}", action, status, message)
}

fn local(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn register(
    client: &reqwest::Client,
    api: &str,
    name: String,
    email: String,
    password: String,
) -> Result<()> {
    let response = client
        .post(format!("{}/register", api))
        .json(&RegisterRequest {
            name,
            email,
            password,
        })
        .send()
        .await?;
    let result: AuthResponse = check(response, "register").await?.json().await?;

    Session {
        token: result.token,
        name: result.user.name.clone(),
        email: result.user.email.clone(),
    }
    .save()?;

    println!("✅ Account created successfully!");
    println!("👤 {} <{}>", result.user.name, result.user.email);
    Ok(())
}

async fn login(client: &reqwest::Client, api: &str, email: String, password: String) -> Result<()> {
    let response = client
        .post(format!("{}/login", api))
        .json(&LoginRequest { email, password })
        .send()
        .await?;
    let result: AuthResponse = check(response, "log in").await?.json().await?;

    Session {
        token: result.token,
        name: result.user.name.clone(),
        email: result.user.email,
    }
    .save()?;

    println!("✅ Login successful!");
    println!("👤 Welcome back, {}!", result.user.name);
    Ok(())
}

async fn upload(client: &reqwest::Client, api: &str, session: &Session, file_path: &str) -> Result<()> {
    let path = Path::new(file_path);
    if !path.is_file() {
        bail!("File not found: {}", file_path);
    }

    let filename = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload.bin")
        .to_string();
    let data = fs::read(path).with_context(|| format!("Failed to read {}", file_path))?;

    let form = multipart::Form::new().part("file", multipart::Part::bytes(data).file_name(filename));
    let response = client
        .post(format!("{}/upload", api))
        .bearer_auth(&session.token)
        .multipart(form)
        .send()
        .await?;
    let result: UploadResponse = check(response, "upload file").await?.json().await?;

    println!("✅ File uploaded successfully!");
    println!("   Name: {}", result.file.original_name);
    println!("   Size: {:.2} KB", result.file.file_size as f64 / 1024.0);
    println!("   ID: {}", result.file.id);
    println!("   Link: {}", result.file.download_link);
    println!("   Expires: {}", local(result.file.expiry_time));
    Ok(())
}

async fn download(client: &reqwest::Client, api: &str, link: &str) -> Result<()> {
    let id = link.trim_end_matches('/').rsplit('/').next().unwrap_or(link);

    let response = client.get(format!("{}/download/{}", api, id)).send().await?;
    let result: DownloadResponse = check(response, "resolve link").await?.json().await?;

    println!("📄 {}", result.filename);
    println!("   Shared by: {}", result.uploaded_by);
    println!("   Downloads: {}", result.download_count);
    println!("   Expires: {}", local(result.expiry_time));
    println!("   URL: {}", result.file_url);
    Ok(())
}

async fn list_files(client: &reqwest::Client, api: &str, session: &Session) -> Result<()> {
    let response = client
        .get(format!("{}/my-files", api))
        .bearer_auth(&session.token)
        .send()
        .await?;
    let result: FileListResponse = check(response, "fetch files").await?.json().await?;

    if result.files.is_empty() {
        println!("📭 No files uploaded yet.");
        return Ok(());
    }

    println!("\n📋 Files for {} ({})\n", session.email, result.files.len());

    let mut table = Table::new();
    table.add_row(Row::new(vec![
        Cell::new("ID"),
        Cell::new("Name"),
        Cell::new("Downloads"),
        Cell::new("Uploaded"),
        Cell::new("Expires"),
        Cell::new("Status"),
    ]));

    for file in result.files {
        let status = if file.is_expired { "expired" } else { "active" };
        table.add_row(Row::new(vec![
            Cell::new(&file.id[..8.min(file.id.len())]),
            Cell::new(&file.original_name),
            Cell::new(&file.download_count.to_string()),
            Cell::new(&local(file.created_at)),
            Cell::new(&local(file.expiry_time)),
            Cell::new(status),
        ]));
    }

    table.printstd();
    println!();
    Ok(())
}

use clap::{Args, Subcommand};
use docstream_core::{
    CollectionPath, Dictionary, Document, DocumentPath, LocalBackend, ResourcePath, StoreClient,
};

use super::OutputFormat;

#[derive(Args)]
pub struct GetCommand {
    /// Document path, e.g. /donations/abc123
    pub path: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct ListCommand {
    /// Collection path, e.g. /donations
    pub path: String,

    /// Output format
    #[arg(long, short, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Args)]
pub struct WriteCommand {
    /// Document path, e.g. /donations/abc123
    pub path: String,

    /// Document fields as a JSON object
    pub json: String,
}

#[derive(Subcommand)]
pub enum DocumentCommand {
    /// Show a single document
    Get(GetCommand),

    /// List the documents in a collection
    List(ListCommand),

    /// Create or replace a document
    Set(WriteCommand),

    /// Merge fields into an existing document
    Update(WriteCommand),
}

impl DocumentCommand {
    pub async fn run(
        &self,
        client: &StoreClient<LocalBackend>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match self {
            DocumentCommand::Get(cmd) => {
                let path = document_path(&cmd.path)?;
                match client.get_document(&path).await? {
                    Some(doc) => match cmd.format {
                        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&doc)?),
                        OutputFormat::Text => print!("{}", format_document(&doc)?),
                    },
                    None => {
                        return Err(format!("Document not found: {}", path).into());
                    }
                }
            }
            DocumentCommand::List(cmd) => {
                let path = collection_path(&cmd.path)?;
                let docs = client.get_collection(&path).await?;
                match cmd.format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&docs)?),
                    OutputFormat::Text => {
                        if docs.is_empty() {
                            println!("No documents found in {}", path);
                        } else {
                            print!("{}", format_table(&docs)?);
                        }
                    }
                }
            }
            DocumentCommand::Set(cmd) => {
                let (path, doc) = parse_write(cmd)?;
                client.set_document(&path, &doc).await?;
                println!("Set {}", path);
            }
            DocumentCommand::Update(cmd) => {
                let (path, doc) = parse_write(cmd)?;
                client.update_document(&path, &doc).await?;
                println!("Updated {}", path);
            }
        }
        Ok(())
    }
}

fn document_path(raw: &str) -> Result<DocumentPath<Document>, Box<dyn std::error::Error>> {
    Ok(DocumentPath::from_path(ResourcePath::parse(raw)?)?)
}

fn collection_path(raw: &str) -> Result<CollectionPath<Document>, Box<dyn std::error::Error>> {
    Ok(CollectionPath::from_path(ResourcePath::parse(raw)?)?)
}

fn parse_write(
    cmd: &WriteCommand,
) -> Result<(DocumentPath<Document>, Document), Box<dyn std::error::Error>> {
    let path = document_path(&cmd.path)?;
    let fields: Dictionary = serde_json::from_str(&cmd.json)
        .map_err(|e| format!("Document fields must be a JSON object: {}", e))?;
    let doc = Document::new(path.key(), fields);
    Ok((path, doc))
}

fn format_document(doc: &Document) -> Result<String, serde_json::Error> {
    let mut out = format!("key: {}\n", doc.key);
    for (name, value) in &doc.fields {
        out.push_str(&format!("{}: {}\n", name, serde_json::to_string(value)?));
    }
    Ok(out)
}

fn format_table(docs: &[Document]) -> Result<String, serde_json::Error> {
    let mut out = format!("{:<24}  FIELDS\n", "KEY");
    out.push_str(&format!("{}\n", "-".repeat(80)));
    for doc in docs {
        let fields = serde_json::to_string(&doc.fields)?;
        let fields = if fields.chars().count() > 54 {
            format!("{}...", fields.chars().take(51).collect::<String>())
        } else {
            fields
        };
        out.push_str(&format!("{:<24}  {}\n", doc.key, fields));
    }
    out.push_str(&format!("\nTotal: {} document(s)\n", docs.len()));
    Ok(out)
}

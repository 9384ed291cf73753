//! TOML description of a complete run, as read by the `herald` binary
//!
//! ```toml
//! [orchestrator]
//! messages_per_second = 2.0
//!
//! [campaign]
//! subject = "October newsletter"
//! sender = "news@example.com"
//! body = "<p>Hello</p>"
//! lists = ["customers", "partners"]
//!
//! [[relay]]
//! id = "smtp-1"
//!
//! [[list]]
//! id = "customers"
//! file = "customers.txt"
//!
//! [[list]]
//! id = "partners"
//! recipients = ["a@example.com", "b@example.com"]
//! ```
//!
//! List files are resolved relative to the campaign file.

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    config::OrchestratorConfig, orchestrator::Campaign, progress::RecipientList, relay::Relay,
};

#[derive(Debug, Error)]
pub enum CampaignFileError {
    #[error("Unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid campaign file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: Box<toml::de::Error>,
    },

    #[error("List {0} has both inline recipients and a file")]
    AmbiguousList(String),

    #[error("Campaign needs either `body` or `body_file`, not both")]
    AmbiguousBody,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CampaignSection {
    subject: String,
    sender: String,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    body_file: Option<PathBuf>,
    #[serde(default)]
    lists: Vec<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ListSection {
    id: String,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    recipients: Vec<String>,
    #[serde(default)]
    file: Option<PathBuf>,
}

/// The raw file contents
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CampaignFile {
    #[serde(default)]
    orchestrator: OrchestratorConfig,
    campaign: CampaignSection,
    #[serde(default, rename = "relay")]
    relays: Vec<Relay>,
    #[serde(default, rename = "list")]
    lists: Vec<ListSection>,
}

/// Everything needed to start a run
#[derive(Debug)]
pub struct CampaignPlan {
    pub config: OrchestratorConfig,
    pub campaign: Campaign,
    pub relays: Vec<Relay>,
    pub lists: Vec<RecipientList>,
}

fn read(path: &Path) -> Result<String, CampaignFileError> {
    std::fs::read_to_string(path).map_err(|source| CampaignFileError::Io {
        path: path.to_path_buf(),
        source,
    })
}

impl CampaignFile {
    /// # Errors
    ///
    /// Returns an error if `contents` is not a valid campaign description.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, CampaignFileError> {
        toml::from_str(contents).map_err(|source| CampaignFileError::Parse {
            path: path.to_path_buf(),
            source: Box::new(source),
        })
    }

    /// Read and resolve the campaign file at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file or any referenced list or body file
    /// cannot be read or parsed.
    pub fn load(path: &Path) -> Result<CampaignPlan, CampaignFileError> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::parse(&read(path)?, path)?.resolve(base)
    }

    /// Read referenced files relative to `base`
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced file cannot be read, or a list or
    /// body is specified twice.
    pub fn resolve(self, base: &Path) -> Result<CampaignPlan, CampaignFileError> {
        let body = match (self.campaign.body, self.campaign.body_file) {
            (Some(_), Some(_)) => return Err(CampaignFileError::AmbiguousBody),
            (Some(body), None) => body.into_bytes(),
            (None, Some(file)) => read(&base.join(file))?.into_bytes(),
            (None, None) => Vec::new(),
        };

        let lists = self
            .lists
            .into_iter()
            .map(|list| {
                let name = list.name.unwrap_or_else(|| list.id.clone());
                match list.file {
                    Some(_) if !list.recipients.is_empty() => {
                        Err(CampaignFileError::AmbiguousList(list.id))
                    }
                    Some(file) => {
                        let path = base.join(file);
                        RecipientList::from_file(list.id, name, &path)
                            .map_err(|source| CampaignFileError::Io { path, source })
                    }
                    None => Ok(RecipientList::new(list.id, name, list.recipients)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CampaignPlan {
            config: self.orchestrator,
            campaign: Campaign::new(self.campaign.subject, self.campaign.sender, body)
                .with_lists(self.campaign.lists),
            relays: self.relays,
            lists,
        })
    }
}

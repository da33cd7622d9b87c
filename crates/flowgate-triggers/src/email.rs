// Email trigger: IMAP polling over a per-poll IMAPS session
//
// The poll loop runs as a supervised task. Each pass opens a fresh session
// inside spawn_blocking (the imap client is synchronous), fetches UNSEEN
// messages by UID, then dispatches matches back on the async side. No
// long-lived IDLE connection is kept.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use flowgate_core::{
    DispatchStatus, Error, Result, TriggerHealth, TriggerKind, TriggerStatus,
};
use mailparse::{MailHeaderMap, ParsedMail};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EmailTriggerConfig;
use crate::trigger::{Trigger, TriggerContext, TriggerState};

const IMAPS_PORT: u16 = 993;
/// Attachments up to this size are embedded base64; larger ones keep
/// metadata only
const ATTACHMENT_EMBED_LIMIT: usize = 1024 * 1024;

/// IMAP service credentials from the environment
#[derive(Clone)]
pub struct EmailEnv {
    pub imap_server: String,
    pub email_user: String,
    pub email_password: String,
    pub default_check_interval: u64,
}

impl EmailEnv {
    /// None when email is not configured; Err when half configured
    pub fn from_env() -> Result<Option<Self>> {
        let imap_server = std::env::var("IMAP_SERVER").ok();
        let email_user = std::env::var("EMAIL_USER").ok();
        let email_password = std::env::var("EMAIL_PASSWORD").ok();
        let default_check_interval = std::env::var("EMAIL_CHECK_INTERVAL")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);

        match (imap_server, email_user, email_password) {
            (None, None, None) => Ok(None),
            (Some(imap_server), Some(email_user), Some(email_password)) => Ok(Some(Self {
                imap_server,
                email_user,
                email_password,
                default_check_interval,
            })),
            _ => Err(Error::configuration(
                "IMAP_SERVER, EMAIL_USER and EMAIL_PASSWORD must be set together",
            )),
        }
    }
}

/// Parsed attachment; `content` is base64 when embedded
#[derive(Debug, Clone, Serialize)]
pub struct EmailAttachment {
    pub filename: String,
    pub content_type: String,
    pub size: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// The message fields the trigger filter and payload care about
#[derive(Debug, Clone, Default)]
pub struct EmailMessage {
    pub uid: u32,
    pub subject: String,
    pub sender: String,
    pub recipient: String,
    pub date: String,
    pub message_id: String,
    pub body_text: String,
    pub body_html: String,
    pub attachments: Vec<EmailAttachment>,
}

pub struct EmailTrigger {
    state: Arc<TriggerState>,
    context: Arc<TriggerContext>,
    config: Arc<EmailTriggerConfig>,
    env: Option<Arc<EmailEnv>>,
    check_interval: Duration,
    task: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl EmailTrigger {
    pub fn new(
        workflow_id: Uuid,
        enabled: bool,
        config: EmailTriggerConfig,
        env: Option<EmailEnv>,
        context: Arc<TriggerContext>,
    ) -> Self {
        let check_interval = Duration::from_secs(
            config
                .check_interval
                .unwrap_or_else(|| env.as_ref().map_or(60, |e| e.default_check_interval)),
        );

        Self {
            state: Arc::new(TriggerState::new(workflow_id, enabled)),
            context,
            config: Arc::new(config),
            env: env.map(Arc::new),
            check_interval,
            task: Mutex::new(None),
        }
    }

    async fn poll_loop(
        state: Arc<TriggerState>,
        context: Arc<TriggerContext>,
        config: Arc<EmailTriggerConfig>,
        env: Arc<EmailEnv>,
        check_interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let workflow_id = state.workflow_id;
        info!(%workflow_id, "email monitoring started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(check_interval) => {}
                _ = shutdown.changed() => break,
            }

            let fetch_env = env.clone();
            let folder = config.folder.clone();
            let fetched = tokio::task::spawn_blocking(move || {
                fetch_unseen_messages(&fetch_env, &folder)
            })
            .await;

            let messages = match fetched {
                Ok(Ok(messages)) => messages,
                Ok(Err(e)) => {
                    error!(%workflow_id, "email check failed: {e}");
                    continue;
                }
                Err(e) => {
                    error!(%workflow_id, "email check task panicked: {e}");
                    continue;
                }
            };

            if messages.is_empty() {
                debug!(%workflow_id, "no new emails");
                continue;
            }
            info!(%workflow_id, count = messages.len(), "found new emails");

            let mut dispatched_uids = Vec::new();
            for message in messages {
                if !matches_email_filter(&config.email_filter, &message) {
                    debug!(%workflow_id, uid = message.uid, "email does not match filter");
                    continue;
                }

                let include_attachments = config.attachment_processing == "include";
                let attachments: Vec<&EmailAttachment> = if include_attachments {
                    message.attachments.iter().collect()
                } else {
                    Vec::new()
                };

                let trigger_data = json!({
                    "trigger_type": "email",
                    "email_id": message.uid,
                    "subject": message.subject,
                    "sender": message.sender,
                    "recipient": message.recipient,
                    "date": message.date,
                    "message_id": message.message_id,
                    "body_text": message.body_text,
                    "body_html": message.body_html,
                    "attachments": attachments,
                    "triggered_at": Utc::now().to_rfc3339(),
                });

                let outcome = context
                    .fire(workflow_id, TriggerKind::Email, state.enabled, trigger_data)
                    .await;

                if outcome.status == DispatchStatus::Started {
                    info!(
                        %workflow_id,
                        uid = message.uid,
                        execution_id = outcome.execution_id.as_deref().unwrap_or(""),
                        "email trigger dispatched"
                    );
                    if config.mark_as_read {
                        dispatched_uids.push(message.uid);
                    }
                } else {
                    warn!(%workflow_id, message = %outcome.message, "email dispatch had issues");
                }
            }

            if !dispatched_uids.is_empty() {
                let mark_env = env.clone();
                let folder = config.folder.clone();
                let marked = tokio::task::spawn_blocking(move || {
                    mark_seen(&mark_env, &folder, &dispatched_uids)
                })
                .await;
                match marked {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%workflow_id, "failed to mark emails as read: {e}"),
                    Err(e) => warn!(%workflow_id, "mark-as-read task panicked: {e}"),
                }
            }
        }

        info!(%workflow_id, "email monitoring stopped");
    }
}

fn imap_session(
    env: &EmailEnv,
) -> Result<imap::Session<native_tls::TlsStream<std::net::TcpStream>>> {
    let tls = native_tls::TlsConnector::builder()
        .build()
        .map_err(|e| Error::trigger(format!("TLS setup failed: {e}")))?;

    let client = imap::connect(
        (env.imap_server.as_str(), IMAPS_PORT),
        env.imap_server.as_str(),
        &tls,
    )
    .map_err(|e| Error::temporary(format!("IMAP connect failed: {e}")))?;

    client
        .login(&env.email_user, &env.email_password)
        .map_err(|(e, _)| Error::authentication(format!("IMAP login failed: {e}")))
}

/// Connect, login, logout. Used by start() to validate the configuration.
fn test_imap_connection(env: &EmailEnv) -> Result<()> {
    let mut session = imap_session(env)?;
    let _ = session.logout();
    Ok(())
}

/// One poll pass: fresh session, UID-search UNSEEN, fetch and parse
fn fetch_unseen_messages(env: &EmailEnv, folder: &str) -> Result<Vec<EmailMessage>> {
    let mut session = imap_session(env)?;

    session
        .select(folder)
        .map_err(|e| Error::trigger(format!("failed to select folder {folder}: {e}")))?;

    let uids = session
        .uid_search("UNSEEN")
        .map_err(|e| Error::temporary(format!("IMAP search failed: {e}")))?;

    let mut messages = Vec::new();
    for uid in uids {
        let fetches = match session.uid_fetch(uid.to_string(), "RFC822") {
            Ok(fetches) => fetches,
            Err(e) => {
                warn!(uid, "failed to fetch email: {e}");
                continue;
            }
        };
        for fetch in fetches.iter() {
            let Some(body) = fetch.body() else {
                continue;
            };
            match mailparse::parse_mail(body) {
                Ok(parsed) => messages.push(extract_email(uid, &parsed)),
                Err(e) => warn!(uid, "failed to parse email: {e}"),
            }
        }
    }

    let _ = session.logout();
    Ok(messages)
}

/// Flag the dispatched messages `\Seen` in a fresh session (UIDs are stable
/// across sessions, sequence numbers are not)
fn mark_seen(env: &EmailEnv, folder: &str, uids: &[u32]) -> Result<()> {
    let mut session = imap_session(env)?;
    session
        .select(folder)
        .map_err(|e| Error::trigger(format!("failed to select folder {folder}: {e}")))?;

    let uid_set = uids
        .iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",");
    session
        .uid_store(uid_set, "+FLAGS (\\Seen)")
        .map_err(|e| Error::temporary(format!("IMAP store failed: {e}")))?;

    let _ = session.logout();
    Ok(())
}

/// Pull the fields the trigger cares about out of a parsed message
fn extract_email(uid: u32, parsed: &ParsedMail) -> EmailMessage {
    let headers = parsed.get_headers();
    let mut message = EmailMessage {
        uid,
        subject: headers.get_first_value("Subject").unwrap_or_default(),
        sender: headers.get_first_value("From").unwrap_or_default(),
        recipient: headers.get_first_value("To").unwrap_or_default(),
        date: headers.get_first_value("Date").unwrap_or_default(),
        message_id: headers.get_first_value("Message-ID").unwrap_or_default(),
        ..EmailMessage::default()
    };

    collect_parts(parsed, &mut message);
    message
}

fn collect_parts(part: &ParsedMail, message: &mut EmailMessage) {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_parts(subpart, message);
        }
        return;
    }

    let disposition = part.get_content_disposition();
    let mimetype = part.ctype.mimetype.to_ascii_lowercase();

    if disposition.disposition == mailparse::DispositionType::Attachment {
        let content = part.get_body_raw().unwrap_or_default();
        let size = content.len();
        let filename = disposition
            .params
            .get("filename")
            .cloned()
            .or_else(|| part.ctype.params.get("name").cloned())
            .unwrap_or_else(|| "unnamed".to_string());

        message.attachments.push(EmailAttachment {
            filename,
            content_type: part.ctype.mimetype.clone(),
            size,
            content: (size <= ATTACHMENT_EMBED_LIMIT).then(|| BASE64.encode(&content)),
        });
        return;
    }

    match mimetype.as_str() {
        "text/plain" => message.body_text.push_str(&part.get_body().unwrap_or_default()),
        "text/html" => message.body_html.push_str(&part.get_body().unwrap_or_default()),
        _ => {}
    }
}

/// Filter grammar: `from:|subject:|to:|body:value` when the filter contains
/// exactly one colon, otherwise a free substring matched across
/// subject + sender + body. Empty filters match everything.
pub fn matches_email_filter(filter: &str, message: &EmailMessage) -> bool {
    let filter = filter.trim();
    if filter.is_empty() {
        return true;
    }

    let parts: Vec<&str> = filter.split(':').collect();
    if parts.len() != 2 {
        let needle = filter.to_lowercase();
        let haystack = format!(
            "{} {} {}",
            message.subject, message.sender, message.body_text
        )
        .to_lowercase();
        return haystack.contains(&needle);
    }

    let field = parts[0].trim().to_lowercase();
    let needle = parts[1].trim().to_lowercase();

    match field.as_str() {
        "from" => message.sender.to_lowercase().contains(&needle),
        "subject" => message.subject.to_lowercase().contains(&needle),
        "to" => message.recipient.to_lowercase().contains(&needle),
        "body" => format!("{} {}", message.body_text, message.body_html)
            .to_lowercase()
            .contains(&needle),
        // Unknown field names fall back to a subject search
        _ => message.subject.to_lowercase().contains(&needle),
    }
}

#[async_trait]
impl Trigger for EmailTrigger {
    fn kind(&self) -> TriggerKind {
        TriggerKind::Email
    }

    fn workflow_id(&self) -> Uuid {
        self.state.workflow_id
    }

    /// Validates the IMAP connection before monitoring starts; a failed
    /// connection test leaves the trigger in ERROR.
    async fn start(&self) -> Result<()> {
        if !self.state.enabled {
            info!(workflow_id = %self.state.workflow_id, "email trigger disabled");
            self.state.set_status(TriggerStatus::Paused).await;
            return Ok(());
        }

        let Some(env) = self.env.clone() else {
            self.state.set_status(TriggerStatus::Error).await;
            return Err(Error::configuration(
                "email credentials not configured (IMAP_SERVER / EMAIL_USER / EMAIL_PASSWORD)",
            ));
        };

        let mut task = self.task.lock().await;
        if task.as_ref().is_some_and(|(_, handle)| !handle.is_finished()) {
            return Ok(());
        }

        let test_env = env.clone();
        let connected = tokio::task::spawn_blocking(move || test_imap_connection(&test_env))
            .await
            .map_err(|e| Error::trigger(format!("connection test task failed: {e}")))?;
        if let Err(e) = connected {
            self.state.set_status(TriggerStatus::Error).await;
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Self::poll_loop(
            self.state.clone(),
            self.context.clone(),
            self.config.clone(),
            env,
            self.check_interval,
            shutdown_rx,
        ));
        *task = Some((shutdown_tx, handle));

        self.state.set_status(TriggerStatus::Active).await;
        info!(workflow_id = %self.state.workflow_id, "email trigger started");
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        if let Some((shutdown, handle)) = self.task.lock().await.take() {
            let _ = shutdown.send(true);
            handle.abort();
        }

        self.state.set_status(TriggerStatus::Stopped).await;
        info!(workflow_id = %self.state.workflow_id, "email trigger stopped");
        Ok(())
    }

    async fn health_check(&self) -> TriggerHealth {
        let monitoring = self
            .task
            .lock()
            .await
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished());

        // Partial address only; the full account name stays out of health
        // output
        let masked_user = self.env.as_ref().map(|env| {
            let user = &env.email_user;
            format!("{}***", &user[..user.len().min(5)])
        });

        self.state
            .base_health(TriggerKind::Email)
            .await
            .with_detail("email_filter", json!(self.config.email_filter))
            .with_detail("folder", json!(self.config.folder))
            .with_detail("mark_as_read", json!(self.config.mark_as_read))
            .with_detail("check_interval", json!(self.check_interval.as_secs()))
            .with_detail("monitoring_active", json!(monitoring))
            .with_detail("email_user", json!(masked_user))
    }
}

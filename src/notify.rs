//! Outgoing notifications to the client: user-visible notices, log lines and
//! the run completion event.

use crate::proto::{RunCompletedNotification, RUN_COMPLETED_METHOD};
use anyhow::Result;
use crossbeam_channel::Sender;
use lsp_server::{Message, Notification};
use lsp_types::{
    notification::{LogMessage, Notification as _, ShowMessage},
    LogMessageParams, MessageType, ShowMessageParams,
};

pub fn show_message(sender: &Sender<Message>, typ: MessageType, message: impl Into<String>) -> Result<()> {
    let params = ShowMessageParams {
        typ,
        message: message.into(),
    };
    let notification = Notification::new(ShowMessage::METHOD.to_string(), serde_json::to_value(params)?);
    sender.send(notification.into())?;
    Ok(())
}

pub fn log_message(sender: &Sender<Message>, typ: MessageType, message: impl Into<String>) -> Result<()> {
    let params = LogMessageParams {
        typ,
        message: message.into(),
    };
    let notification = Notification::new(LogMessage::METHOD.to_string(), serde_json::to_value(params)?);
    sender.send(notification.into())?;
    Ok(())
}

pub fn run_completed(sender: &Sender<Message>, payload: &RunCompletedNotification) -> Result<()> {
    let notification = Notification::new(RUN_COMPLETED_METHOD.to_string(), serde_json::to_value(payload)?);
    sender.send(notification.into())?;
    Ok(())
}

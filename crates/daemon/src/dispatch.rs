// SPDX-License-Identifier: MIT

//! Executes handler actions against the transport.

use relay_chat::{Action, MessageTransport};

/// Perform each action in order. Transport failures are logged and do
/// not stop the remaining actions; the chat surface is best-effort.
pub async fn perform<T: MessageTransport>(transport: &T, chat_id: i64, actions: Vec<Action>) {
    for action in actions {
        let result = match action {
            Action::Reply { text } => transport
                .send_message(chat_id, &text, None)
                .await
                .map(|_| ()),
            Action::ReplyKeyboard { text, keyboard } => transport
                .send_message(chat_id, &text, Some(&keyboard))
                .await
                .map(|_| ()),
            Action::EditKeyboard {
                message_id,
                text,
                keyboard,
            } => {
                let edited = transport
                    .edit_message(chat_id, message_id, &text, Some(&keyboard))
                    .await;
                match edited {
                    Ok(()) => Ok(()),
                    // Message may be gone; degrade to a fresh send.
                    Err(_) => transport
                        .send_message(chat_id, &text, Some(&keyboard))
                        .await
                        .map(|_| ()),
                }
            }
            Action::ReplyWithDocument { path, caption } => transport
                .send_document(chat_id, &path, caption.as_deref())
                .await
                .map(|_| ()),
            Action::Toast { callback_id, text } => {
                transport.answer_callback(&callback_id, text.as_deref()).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(chat_id, error = %e, "failed to perform chat action");
        }
    }
}

//! Worker pool: drains the queue and sends replies.
//!
//! Each worker is one OS thread running a single cooperative loop: pop a
//! message, pace the reply, acknowledge with a typing notice, ask the
//! completion service for a reply, strip it, send it. Workers own their own
//! platform and completion clients because the blocking transports are not
//! shared across threads.
//!
//! # Pacing
//!
//! A reply is held until `reply_delay` seconds have passed since the
//! message's ingress stamp, so a sender never receives replies faster than
//! the configured rate no matter how many workers are draining. The wait is
//! interruptible: on shutdown the worker abandons the paced message and
//! exits, while messages that need no wait keep draining until the queue
//! reports closed.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::completion::CompletionClient;
use crate::config::Config;
use crate::queue::{MessageQueue, PopError};
use crate::shutdown::Shutdown;
use crate::telegram::TelegramClient;

/// Acknowledgment sent while the completion service is working.
const TYPING_NOTICE: &str = "\u{270D} Thinking...";

/// Spawns `config.worker_count` workers. Join the returned handles after
/// signalling shutdown.
pub fn spawn_workers(
    config: &Arc<Config>,
    queue: &Arc<MessageQueue>,
    shutdown: &Arc<Shutdown>,
) -> Vec<JoinHandle<()>> {
    (0..config.worker_count)
        .map(|id| {
            let config = Arc::clone(config);
            let queue = Arc::clone(queue);
            let shutdown = Arc::clone(shutdown);
            std::thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || worker_loop(id, &config, &queue, &shutdown))
                .expect("spawn worker thread")
        })
        .collect()
}

fn worker_loop(id: usize, config: &Config, queue: &MessageQueue, shutdown: &Shutdown) {
    let telegram = match TelegramClient::new(&config.api_base, &config.bot_token) {
        Ok(client) => client,
        Err(err) => {
            tracing::error!(worker = id, error = %err, "platform client init failed");
            return;
        }
    };

    let completion = if config.completion_endpoint.is_empty() {
        None
    } else {
        match CompletionClient::new(
            &config.completion_endpoint,
            &config.completion_model,
            config.completion_max_tokens,
        ) {
            Ok(client) => Some(client),
            Err(err) => {
                tracing::warn!(worker = id, error = %err, "completion init failed, will echo");
                None
            }
        }
    };

    tracing::info!(worker = id, "ready");

    loop {
        let msg = match queue.pop() {
            Ok(msg) => msg,
            Err(PopError::Closed) => break,
        };

        // Pace the reply against the message's ingress time.
        let target = Duration::from_secs(config.reply_delay);
        let elapsed = msg.ingress.elapsed();
        if elapsed < target && !shutdown.sleep(target - elapsed) {
            tracing::info!(worker = id, "exiting (interrupted)");
            return;
        }

        if completion.is_some() {
            let _ = telegram.send_message(msg.chat, TYPING_NOTICE);
        }

        let reply = completion.as_ref().and_then(|client| {
            match client.chat(&config.completion_system_prompt, &msg.text) {
                Ok(reply) => Some(reply),
                Err(err) => {
                    tracing::error!(worker = id, error = %err, "completion failed, echoing");
                    None
                }
            }
        });

        let outcome = match reply {
            Some(text) => telegram.send_message(msg.chat, &text),
            None => telegram.send_message(msg.chat, &format!("Hello! You said: {}", msg.text)),
        };
        if let Err(err) = outcome {
            tracing::error!(worker = id, chat = %msg.chat, error = %err, "reply send failed");
        }
    }

    tracing::info!(worker = id, "exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    fn test_config() -> Arc<Config> {
        let vars = [
            ("T_TOKEN", "tok"),
            // Point nowhere reachable; these tests never send traffic.
            ("RELAY_API_BASE", "http://127.0.0.1:1/bot"),
            ("RELAY_COMPLETION_ENDPOINT", ""),
            ("RELAY_WORKER_COUNT", "2"),
            ("RELAY_REPLY_DELAY", "0"),
        ];
        Arc::new(
            Config::from_lookup(|key| {
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            })
            .unwrap(),
        )
    }

    #[test]
    fn workers_exit_on_queue_shutdown() {
        let config = test_config();
        let queue = Arc::new(MessageQueue::new(8));
        let shutdown = Arc::new(Shutdown::new());

        let handles = spawn_workers(&config, &queue, &shutdown);
        assert_eq!(handles.len(), 2);

        shutdown.trigger();
        queue.shutdown();
        for handle in handles {
            handle.join().expect("worker exits cleanly");
        }
    }

    #[test]
    fn paced_worker_abandons_message_on_interrupt() {
        // One worker, a long pacing delay, and an immediate shutdown: the
        // worker must return well before the delay elapses.
        let vars = [
            ("T_TOKEN", "tok"),
            ("RELAY_API_BASE", "http://127.0.0.1:1/bot"),
            ("RELAY_COMPLETION_ENDPOINT", ""),
            ("RELAY_REPLY_DELAY", "300"),
        ];
        let config = Arc::new(
            Config::from_lookup(|key| {
                vars.iter()
                    .find(|(k, _)| *k == key)
                    .map(|(_, v)| v.to_string())
            })
            .unwrap(),
        );
        let queue = Arc::new(MessageQueue::new(8));
        let shutdown = Arc::new(Shutdown::new());
        queue
            .push(crate::types::SenderId(1), crate::types::ChatId(1), "wait for me")
            .unwrap();

        let started = Instant::now();
        let handles = spawn_workers(&config, &queue, &shutdown);
        std::thread::sleep(Duration::from_millis(100));
        shutdown.trigger();
        queue.shutdown();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}

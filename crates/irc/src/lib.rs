//! IRC adapter for the bridge.
//!
//! Wraps the `irc` crate: a read loop translates server messages into
//! [`LineEvent`]s, and [`IrcTransport`] implements the outbound client
//! trait over the connection's sender handle. Reconnection builds a fresh
//! connection and swaps the sender, driven by the recovery manager.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use {
    anyhow::{Context, Result},
    async_trait::async_trait,
    futures::StreamExt,
    irc::{
        client::{Client, ClientStream, Sender, data::Config},
        proto::{Command, Message, Response},
    },
    tokio::task::JoinHandle,
    tracing::{debug, info, warn},
};

use {
    trestle_bridge::{LineClient, event::LineEvent},
    trestle_config::IrcConfig,
};

/// CTCP ACTION framing around `/me` messages.
const CTCP_DELIMITER: char = '\u{1}';

pub struct IrcTransport {
    config: IrcConfig,
    /// Channels to join, passwords included.
    channels: Vec<String>,
    events: tokio::sync::mpsc::UnboundedSender<LineEvent>,
    sender: RwLock<Option<Sender>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
}

impl IrcTransport {
    /// Build the transport without touching the network. Call
    /// [`IrcTransport::connect`] to establish the first connection.
    #[must_use]
    pub fn new(
        config: IrcConfig,
        channels: Vec<String>,
        events: tokio::sync::mpsc::UnboundedSender<LineEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            channels,
            events,
            sender: RwLock::new(None),
            read_task: Mutex::new(None),
        })
    }

    /// Connect to the IRC server and start the read loop. Events flow into
    /// the event channel until the connection drops; the recovery manager
    /// calls [`IrcTransport::reconnect`] to bring it back.
    pub async fn connect(&self) -> Result<()> {
        self.open_connection().await
    }

    /// Tear down any previous connection and establish a new one. Used as
    /// the recovery manager's reconnection procedure.
    pub async fn reconnect(&self) -> Result<()> {
        {
            let mut task = self.read_task.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(task) = task.take() {
                task.abort();
            }
        }
        self.open_connection().await
    }

    async fn open_connection(&self) -> Result<()> {
        let irc_config = Config {
            server: Some(self.config.server.clone()),
            port: Some(self.config.port),
            nickname: Some(self.config.nickname.clone()),
            username: Some(self.config.nickname.clone()),
            realname: Some(self.config.nickname.clone()),
            use_tls: Some(self.config.use_tls),
            password: self.config.password.clone(),
            channels: self.channels.clone(),
            ..Config::default()
        };

        let mut client = Client::from_config(irc_config)
            .await
            .context("irc connect failed")?;
        client.identify().context("irc identify failed")?;
        let stream = client.stream().context("irc stream failed")?;

        info!(server = %self.config.server, nick = %self.config.nickname, "irc connected");
        *self.sender.write().unwrap_or_else(|e| e.into_inner()) = Some(client.sender());

        let events = self.events.clone();
        let own_nick = self.config.nickname.clone();
        let auto_send = self.config.auto_send_commands.clone();
        let sender = client.sender();
        let handle = tokio::spawn(read_loop(stream, sender, events, own_nick, auto_send));
        *self.read_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }

    fn sender(&self) -> Result<Sender> {
        self.sender
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .context("irc connection not established")
    }

    /// Stop the read loop. Used at shutdown.
    pub fn disconnect(&self) {
        let mut task = self.read_task.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(task) = task.take() {
            task.abort();
        }
    }
}

#[async_trait]
impl LineClient for IrcTransport {
    async fn say(&self, target: &str, text: &str) -> Result<()> {
        self.sender()?
            .send_privmsg(target, text)
            .context("irc send failed")?;
        Ok(())
    }

    async fn join(&self, channel: &str) -> Result<()> {
        self.sender()?
            .send_join(channel)
            .context("irc join failed")?;
        Ok(())
    }

    fn nickname(&self) -> String {
        self.config.nickname.clone()
    }
}

/// Translate the server message stream into bridge events until the
/// connection drops.
async fn read_loop(
    mut stream: ClientStream,
    sender: Sender,
    events: tokio::sync::mpsc::UnboundedSender<LineEvent>,
    own_nick: String,
    auto_send: Vec<String>,
) {
    // Channel → nicks accumulated across NAMREPLY lines until ENDOFNAMES.
    let mut pending_names: HashMap<String, Vec<String>> = HashMap::new();

    loop {
        let message = match stream.next().await {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(error = %e, "irc stream error");
                let _ = events.send(LineEvent::TransportError(e.to_string()));
                break;
            },
            None => {
                let _ = events.send(LineEvent::Closed("irc stream ended".into()));
                break;
            },
        };

        if let Some(event) = translate(&message, &own_nick, &mut pending_names) {
            if matches!(event, LineEvent::Registered) {
                for raw in &auto_send {
                    let line = format!("{}\r\n", raw.trim_end());
                    match line.parse::<Message>() {
                        Ok(command) => {
                            if let Err(e) = sender.send(command) {
                                warn!(error = %e, "failed to send auto command");
                            }
                        },
                        Err(e) => warn!(line = %raw, error = %e, "unparsable auto command"),
                    }
                }
            }
            let _ = events.send(event);
        }
    }
    debug!("irc read loop stopped");
}

/// Map one server message to a bridge event. Returns `None` for protocol
/// chatter the bridge does not care about.
fn translate(
    message: &Message,
    own_nick: &str,
    pending_names: &mut HashMap<String, Vec<String>>,
) -> Option<LineEvent> {
    let from = message.source_nickname().unwrap_or_default().to_owned();

    match &message.command {
        Command::PRIVMSG(target, text) => {
            let (text, is_action) = strip_ctcp_action(text);
            if target.eq_ignore_ascii_case(own_nick) {
                // Actions in queries relay like any other private message.
                return Some(LineEvent::PrivateMessage {
                    from,
                    text: text.to_owned(),
                });
            }
            if is_action {
                Some(LineEvent::Action {
                    from,
                    channel: target.clone(),
                    text: text.to_owned(),
                })
            } else {
                Some(LineEvent::Message {
                    from,
                    channel: target.clone(),
                    text: text.to_owned(),
                })
            }
        },
        Command::NOTICE(target, text) => {
            if target.starts_with('#') {
                Some(LineEvent::Notice {
                    from,
                    channel: target.clone(),
                    text: text.clone(),
                })
            } else {
                None
            }
        },
        Command::JOIN(channels, _, _) => Some(LineEvent::Join {
            channel: channels.clone(),
            nick: from,
        }),
        Command::PART(channels, comment) => Some(LineEvent::Part {
            channel: channels.clone(),
            nick: from,
            reason: comment.clone().unwrap_or_default(),
        }),
        Command::QUIT(comment) => Some(LineEvent::Quit {
            nick: from,
            reason: comment.clone().unwrap_or_default(),
            // The server does not say which channels; the bridge resolves
            // them from its own membership view.
            channels: Vec::new(),
        }),
        Command::NICK(new_nick) => Some(LineEvent::Nick {
            old_nick: from,
            new_nick: new_nick.clone(),
            channels: Vec::new(),
        }),
        Command::INVITE(_, channel) => Some(LineEvent::Invite {
            channel: channel.clone(),
            from,
        }),
        Command::Response(Response::RPL_WELCOME, _) => Some(LineEvent::Registered),
        Command::Response(Response::RPL_NAMREPLY, args) => {
            // Args: <client> <symbol> <channel> :<nicks...>
            if let [.., channel, nicks] = args.as_slice() {
                pending_names
                    .entry(channel.clone())
                    .or_default()
                    .extend(nicks.split_whitespace().map(strip_nick_prefix));
            }
            None
        },
        Command::Response(Response::RPL_ENDOFNAMES, args) => {
            let channel = args.get(1)?.clone();
            let nicks = pending_names.remove(&channel).unwrap_or_default();
            debug!(channel = %channel, count = nicks.len(), "received names");
            Some(LineEvent::Names { channel, nicks })
        },
        Command::Response(Response::ERR_NICKNAMEINUSE, _) => Some(LineEvent::TransportError(
            "nickname already in use".to_owned(),
        )),
        _ => None,
    }
}

/// Strip `@`/`+`-style mode prefixes from a NAMES entry.
fn strip_nick_prefix(nick: &str) -> String {
    nick.trim_start_matches(['~', '&', '@', '%', '+']).to_owned()
}

/// Unwrap CTCP ACTION framing, returning the inner text and whether the
/// message was an action.
fn strip_ctcp_action(text: &str) -> (&str, bool) {
    let trimmed = text
        .strip_prefix(CTCP_DELIMITER)
        .and_then(|t| t.strip_prefix("ACTION "))
        .map(|t| t.trim_end_matches(CTCP_DELIMITER));
    match trimmed {
        Some(inner) => (inner, true),
        None => (text, false),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(line: &str) -> Message {
        line.parse().expect("valid irc line")
    }

    fn names() -> HashMap<String, Vec<String>> {
        HashMap::new()
    }

    #[test]
    fn privmsg_to_channel_is_a_message() {
        let event = translate(
            &parse(":alice!u@h PRIVMSG #general :hello\r\n"),
            "bridge",
            &mut names(),
        );
        match event {
            Some(LineEvent::Message {
                from,
                channel,
                text,
            }) => {
                assert_eq!(from, "alice");
                assert_eq!(channel, "#general");
                assert_eq!(text, "hello");
            },
            other => panic!("expected Message, got {other:?}"),
        }
    }

    #[test]
    fn privmsg_to_own_nick_is_a_private_message() {
        let event = translate(
            &parse(":alice!u@h PRIVMSG bridge :psst\r\n"),
            "bridge",
            &mut names(),
        );
        assert!(matches!(event, Some(LineEvent::PrivateMessage { .. })));
    }

    #[test]
    fn ctcp_action_is_an_action() {
        let event = translate(
            &parse(":alice!u@h PRIVMSG #general :\u{1}ACTION waves\u{1}\r\n"),
            "bridge",
            &mut names(),
        );
        match event {
            Some(LineEvent::Action { text, .. }) => assert_eq!(text, "waves"),
            other => panic!("expected Action, got {other:?}"),
        }
    }

    #[test]
    fn names_accumulate_until_end_of_names() {
        let mut pending = names();
        assert!(
            translate(
                &parse(":server 353 bridge = #general :@alice +bob carol\r\n"),
                "bridge",
                &mut pending,
            )
            .is_none()
        );
        let event = translate(
            &parse(":server 366 bridge #general :End of /NAMES list.\r\n"),
            "bridge",
            &mut pending,
        );
        match event {
            Some(LineEvent::Names { channel, nicks }) => {
                assert_eq!(channel, "#general");
                assert_eq!(nicks, vec!["alice", "bob", "carol"]);
            },
            other => panic!("expected Names, got {other:?}"),
        }
    }

    #[test]
    fn quit_and_nick_leave_channel_resolution_to_the_bridge() {
        let quit = translate(
            &parse(":alice!u@h QUIT :ping timeout\r\n"),
            "bridge",
            &mut names(),
        );
        assert!(matches!(
            quit,
            Some(LineEvent::Quit { ref channels, .. }) if channels.is_empty()
        ));

        let nick = translate(&parse(":alice!u@h NICK :alicia\r\n"), "bridge", &mut names());
        match nick {
            Some(LineEvent::Nick {
                old_nick, new_nick, ..
            }) => {
                assert_eq!(old_nick, "alice");
                assert_eq!(new_nick, "alicia");
            },
            other => panic!("expected Nick, got {other:?}"),
        }
    }
}

//! libcurl multi socket-action backend.
//!
//! Transfers are `Easy2<Collector>` handles. The multi handle never waits on
//! its own: the host reactor reports readiness and the registry calls
//! [`Multiplexer::perform`] for that descriptor or for the timeout.

use std::collections::VecDeque;
use std::sync::Arc;

use curl::easy::{Easy2, Handler, IpResolve, WriteError};
use curl::multi::{Easy2Handle, Events, Multi};

use crate::config::HttpConfig;
use crate::error::MultiplexerError;
use crate::transfer::{AddressFamily, TransferOptions, TransferProgress};

use super::{
    HookSender, Interest, Message, Multiplexer, NativeHandle, PerformStatus, Readiness, Socket,
    TransferStatus,
};

const MAX_REDIRECTS: u32 = 5;

/// Easy2 handler: buffers the body and publishes byte counters.
pub struct Collector {
    body: Vec<u8>,
    progress: Arc<TransferProgress>,
}

impl Collector {
    pub fn new(progress: Arc<TransferProgress>) -> Self {
        Self {
            body: Vec::new(),
            progress,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }

    fn progress(&mut self, dltotal: f64, dlnow: f64, _ultotal: f64, _ulnow: f64) -> bool {
        self.progress.record(dlnow as u64, dltotal as u64);
        true
    }
}

fn setopt(op: &'static str, res: Result<(), curl::Error>) -> Result<(), MultiplexerError> {
    res.map_err(|e| MultiplexerError::new(op, e.to_string()))
}

fn multi_err(op: &'static str) -> impl Fn(curl::MultiError) -> MultiplexerError {
    move |e| MultiplexerError::new(op, e.to_string())
}

/// Detached curl handle.
pub struct CurlHandle {
    easy: Easy2<Collector>,
}

impl CurlHandle {
    pub fn new(
        url: &str,
        options: &TransferOptions,
        progress: Arc<TransferProgress>,
    ) -> Result<Self, MultiplexerError> {
        let mut easy = Easy2::new(Collector::new(progress));
        setopt("url", easy.url(url))?;
        setopt("signal", easy.signal(false))?;
        setopt("progress", easy.progress(true))?;
        // HTTP >= 400 becomes a transport error with curl's diagnostic.
        setopt("fail_on_error", easy.fail_on_error(true))?;
        setopt("follow_location", easy.follow_location(options.follow_redirects))?;
        if options.follow_redirects {
            setopt("max_redirections", easy.max_redirections(MAX_REDIRECTS))?;
        }
        if let Some(t) = options.timeout {
            setopt("timeout", easy.timeout(t))?;
        }
        if let Some(t) = options.connect_timeout {
            setopt("connect_timeout", easy.connect_timeout(t))?;
        }
        setopt("ip_resolve", easy.ip_resolve(IpResolve::V4))?;
        Ok(Self { easy })
    }
}

impl NativeHandle for CurlHandle {
    fn apply_config(&mut self, cfg: &HttpConfig) -> Result<(), MultiplexerError> {
        let easy = &mut self.easy;
        if !cfg.user_agent.is_empty() {
            setopt("useragent", easy.useragent(&cfg.user_agent))?;
        }
        if !cfg.proxy.is_empty() {
            setopt("proxy", easy.proxy(&cfg.proxy))?;
        }
        if !cfg.bind_address.is_empty() {
            setopt("interface", easy.interface(&cfg.bind_address))?;
        }
        if !cfg.ca_path.is_empty() {
            setopt("capath", easy.capath(&cfg.ca_path))?;
        }
        if !cfg.ca_file.is_empty() {
            setopt("cainfo", easy.cainfo(&cfg.ca_file))?;
        }
        setopt("ssl_verify_host", easy.ssl_verify_host(cfg.verify_host))?;
        setopt("ssl_verify_peer", easy.ssl_verify_peer(cfg.verify_peer))?;
        setopt("dns_cache_timeout", easy.dns_cache_timeout(cfg.dns_cache_ttl()))?;
        Ok(())
    }

    fn set_address_family(&mut self, family: AddressFamily) -> Result<(), MultiplexerError> {
        let resolve = match family {
            AddressFamily::V4 => IpResolve::V4,
            AddressFamily::V6 => IpResolve::V6,
        };
        setopt("ip_resolve", self.easy.ip_resolve(resolve))
    }

    fn reset_attempt(&mut self) {
        let collector = self.easy.get_mut();
        collector.body.clear();
        collector.progress.reset();
    }

    fn take_body(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.easy.get_mut().body)
    }
}

pub struct CurlMultiplexer {
    multi: Multi,
    messages: VecDeque<Message>,
}

impl CurlMultiplexer {
    pub fn new() -> Self {
        Self {
            multi: Multi::new(),
            messages: VecDeque::new(),
        }
    }

    fn collect_messages(&mut self) {
        let messages = &mut self.messages;
        self.multi.messages(|msg| {
            let token = match msg.token() {
                Ok(t) => t,
                Err(e) => {
                    tracing::warn!("curl message without token: {}", e);
                    messages.push_back(Message::Other { token: None });
                    return;
                }
            };
            let entry = match msg.result() {
                Some(Ok(())) => Message::Done {
                    token,
                    status: TransferStatus::Ok,
                },
                Some(Err(e)) if e.is_couldnt_resolve_host() => Message::Done {
                    token,
                    status: TransferStatus::ResolveFailed(e.to_string()),
                },
                Some(Err(e)) => Message::Done {
                    token,
                    status: TransferStatus::Failed(e.to_string()),
                },
                None => Message::Other { token: Some(token) },
            };
            messages.push_back(entry);
        });
    }
}

impl Default for CurlMultiplexer {
    fn default() -> Self {
        Self::new()
    }
}

impl Multiplexer for CurlMultiplexer {
    type Handle = CurlHandle;
    type Attached = Easy2Handle<Collector>;

    fn install_hooks(&mut self, hooks: HookSender) -> Result<(), MultiplexerError> {
        let socket_hooks = hooks.clone();
        self.multi
            .socket_function(move |socket, events, _token| {
                if events.remove() {
                    socket_hooks.unwatch(socket);
                    return;
                }
                let interest = if events.input_and_output() {
                    Interest::BOTH
                } else if events.output() {
                    Interest::WRITE
                } else {
                    Interest::READ
                };
                socket_hooks.watch(socket, interest);
            })
            .map_err(multi_err("socket_function"))?;
        self.multi
            .timer_function(move |timeout| {
                hooks.timeout(timeout);
                true
            })
            .map_err(multi_err("timer_function"))?;
        Ok(())
    }

    fn create_handle(
        &self,
        url: &str,
        options: &TransferOptions,
        progress: Arc<TransferProgress>,
    ) -> Result<CurlHandle, MultiplexerError> {
        CurlHandle::new(url, options, progress)
    }

    fn add(
        &mut self,
        handle: CurlHandle,
        token: usize,
    ) -> Result<Easy2Handle<Collector>, MultiplexerError> {
        let mut attached = self.multi.add2(handle.easy).map_err(multi_err("add"))?;
        attached
            .set_token(token)
            .map_err(|e| MultiplexerError::new("set_token", e.to_string()))?;
        Ok(attached)
    }

    fn remove(&mut self, attached: Easy2Handle<Collector>) -> Result<CurlHandle, MultiplexerError> {
        let easy = self.multi.remove2(attached).map_err(multi_err("remove"))?;
        Ok(CurlHandle { easy })
    }

    fn perform(
        &mut self,
        socket: Option<Socket>,
        readiness: Readiness,
    ) -> Result<PerformStatus, MultiplexerError> {
        let res = match socket {
            Some(socket) => {
                let mut events = Events::new();
                events
                    .input(readiness.readable)
                    .output(readiness.writable)
                    .error(readiness.error);
                self.multi.action(socket, &events)
            }
            None => self.multi.timeout(),
        };
        match res {
            Ok(running) => Ok(PerformStatus {
                running: Some(running as usize),
                call_again: false,
            }),
            Err(e) if e.is_call_perform() => Ok(PerformStatus {
                running: None,
                call_again: true,
            }),
            Err(e) => Err(MultiplexerError::new("socket_action", e.to_string())),
        }
    }

    fn next_message(&mut self) -> Option<Message> {
        if self.messages.is_empty() {
            self.collect_messages();
        }
        self.messages.pop_front()
    }

    fn recommended_timeout(&mut self) -> Result<Option<std::time::Duration>, MultiplexerError> {
        self.multi.get_timeout().map_err(multi_err("timeout"))
    }
}

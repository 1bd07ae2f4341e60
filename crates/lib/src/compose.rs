//! Response composer: merges `onemessage` text parts, paces delivery and hands each outbound
//! message to the provider's send adapter.

use crate::channels::{AdapterRegistry, Provider};
use crate::reply::{PartKind, ResponsePart};
use std::sync::Arc;
use std::time::Duration;

/// One message as it goes out to the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Image(String),
    Audio(String),
    Video(String),
}

/// Collapse runs of combinable text parts into single text messages, preserving order.
pub fn compose(parts: Vec<ResponsePart>) -> Vec<Outbound> {
    let mut out = Vec::with_capacity(parts.len());
    let mut buffer: Vec<String> = Vec::new();
    let mut iter = parts.into_iter().peekable();

    while let Some(part) = iter.next() {
        if part.is_combinable() {
            if part.content.trim().is_empty() {
                log::debug!("composer: skipping empty text part");
            } else {
                buffer.push(part.content);
            }
            let continues = iter.peek().map_or(false, ResponsePart::is_combinable);
            if !continues && !buffer.is_empty() {
                out.push(Outbound::Text(buffer.join("\n")));
                buffer.clear();
            }
            continue;
        }
        if !buffer.is_empty() {
            out.push(Outbound::Text(buffer.join("\n")));
            buffer.clear();
        }
        match part.kind {
            PartKind::Text if part.content.trim().is_empty() => {
                log::debug!("composer: skipping empty text part");
            }
            PartKind::Text => out.push(Outbound::Text(part.content)),
            PartKind::Image => out.push(Outbound::Image(part.content)),
            PartKind::Audio => out.push(Outbound::Audio(part.content)),
            PartKind::Video => out.push(Outbound::Video(part.content)),
        }
    }
    if !buffer.is_empty() {
        out.push(Outbound::Text(buffer.join("\n")));
    }
    out
}

pub struct ResponseComposer {
    registry: Arc<AdapterRegistry>,
    delay: Duration,
}

impl ResponseComposer {
    pub fn new(registry: Arc<AdapterRegistry>, delay: Duration) -> Self {
        Self { registry, delay }
    }

    /// Deliver `parts` to `sender_id` through the device's provider. Sleeps `delay` before every
    /// send. Returns how many messages the provider accepted.
    pub async fn send(
        &self,
        device_id: &str,
        sender_id: &str,
        provider: Provider,
        parts: Vec<ResponsePart>,
    ) -> usize {
        if parts.is_empty() {
            return 0;
        }
        let Some(device) = self.registry.device(device_id).await else {
            log::warn!("composer: no credentials for device {}, reply dropped", device_id);
            return 0;
        };
        let Some(adapter) = self.registry.get(provider).await else {
            log::warn!("composer: no {} adapter registered, reply dropped", provider);
            return 0;
        };

        let outbound = compose(parts);
        let total = outbound.len();
        let mut sent = 0;
        for (i, msg) in outbound.into_iter().enumerate() {
            tokio::time::sleep(self.delay).await;
            let res = match &msg {
                Outbound::Text(text) => adapter.send_text(&device, sender_id, text).await,
                Outbound::Image(url) => adapter.send_image(&device, sender_id, url, None).await,
                Outbound::Audio(url) => {
                    adapter.send_media(&device, sender_id, PartKind::Audio, url).await
                }
                Outbound::Video(url) => {
                    adapter.send_media(&device, sender_id, PartKind::Video, url).await
                }
            };
            match res {
                Ok(()) => sent += 1,
                Err(e) => log::warn!(
                    "composer: message {}/{} to {} via {} failed: {}",
                    i + 1,
                    total,
                    sender_id,
                    provider,
                    e
                ),
            }
        }
        log::info!(
            "composer: delivered {}/{} message(s) to {} on {}",
            sent,
            total,
            sender_id,
            device_id
        );
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::{DeviceCredentials, SendAdapter, SendError};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::time::Instant;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Instant, Outbound)>>,
        fail_first: bool,
    }

    impl Recorder {
        fn record(&self, msg: Outbound) -> Result<(), SendError> {
            let mut sent = self.sent.lock().unwrap();
            sent.push((Instant::now(), msg));
            if self.fail_first && sent.len() == 1 {
                return Err(SendError::Api("500 upstream".into()));
            }
            Ok(())
        }

        fn messages(&self) -> Vec<Outbound> {
            self.sent.lock().unwrap().iter().map(|(_, m)| m.clone()).collect()
        }
    }

    #[async_trait]
    impl SendAdapter for Recorder {
        fn provider(&self) -> Provider {
            Provider::Wablas
        }

        async fn send_text(
            &self,
            _device: &DeviceCredentials,
            _to: &str,
            text: &str,
        ) -> Result<(), SendError> {
            self.record(Outbound::Text(text.into()))
        }

        async fn send_image(
            &self,
            _device: &DeviceCredentials,
            _to: &str,
            url: &str,
            _caption: Option<&str>,
        ) -> Result<(), SendError> {
            self.record(Outbound::Image(url.into()))
        }

        async fn send_media(
            &self,
            _device: &DeviceCredentials,
            _to: &str,
            kind: PartKind,
            url: &str,
        ) -> Result<(), SendError> {
            match kind {
                PartKind::Audio => self.record(Outbound::Audio(url.into())),
                _ => self.record(Outbound::Video(url.into())),
            }
        }
    }

    async fn composer(recorder: Arc<Recorder>, delay: Duration) -> ResponseComposer {
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(recorder).await;
        registry
            .register_device(DeviceCredentials {
                device_id: "dev".into(),
                ..DeviceCredentials::default()
            })
            .await;
        ResponseComposer::new(registry, delay)
    }

    #[test]
    fn onemessage_run_becomes_one_text() {
        let out = compose(vec![
            ResponsePart::one_message("A"),
            ResponsePart::one_message("B"),
            ResponsePart::media(PartKind::Image, "https://x/c.png"),
        ]);
        assert_eq!(
            out,
            vec![
                Outbound::Text("A\nB".into()),
                Outbound::Image("https://x/c.png".into())
            ]
        );
    }

    #[test]
    fn blank_onemessage_parts_are_skipped() {
        let out = compose(vec![
            ResponsePart::one_message("A"),
            ResponsePart::one_message("  "),
            ResponsePart::one_message("B"),
            ResponsePart::text("C"),
            ResponsePart::one_message(""),
        ]);
        assert_eq!(
            out,
            vec![Outbound::Text("A\nB".into()), Outbound::Text("C".into())]
        );
    }

    #[test]
    fn normal_part_splits_runs() {
        let out = compose(vec![
            ResponsePart::one_message("A"),
            ResponsePart::text("B"),
            ResponsePart::one_message("C"),
            ResponsePart::one_message("D"),
        ]);
        assert_eq!(
            out,
            vec![
                Outbound::Text("A".into()),
                Outbound::Text("B".into()),
                Outbound::Text("C\nD".into())
            ]
        );
    }

    #[test]
    fn onemessage_media_is_sent_alone() {
        let mut audio = ResponsePart::media(PartKind::Audio, "https://x/a.ogg");
        audio.combine = crate::reply::CombineMode::OneMessage;
        let out = compose(vec![ResponsePart::one_message("A"), audio]);
        assert_eq!(
            out,
            vec![
                Outbound::Text("A".into()),
                Outbound::Audio("https://x/a.ogg".into())
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sends_are_paced_before_each_message() {
        let recorder = Arc::new(Recorder::default());
        let composer = composer(recorder.clone(), Duration::from_secs(1)).await;
        let start = Instant::now();
        let sent = composer
            .send(
                "dev",
                "60123456789",
                Provider::Wablas,
                vec![
                    ResponsePart::text("one"),
                    ResponsePart::text("two"),
                    ResponsePart::media(PartKind::Video, "https://x/v.mp4"),
                ],
            )
            .await;
        assert_eq!(sent, 3);
        assert!(start.elapsed() >= Duration::from_secs(3));
        let times: Vec<Instant> = recorder.sent.lock().unwrap().iter().map(|(t, _)| *t).collect();
        assert!(times[0] - start >= Duration::from_secs(1));
        assert!(times[1] - times[0] >= Duration::from_secs(1));
        assert!(times[2] - times[1] >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_does_not_stop_the_rest() {
        let recorder = Arc::new(Recorder {
            fail_first: true,
            ..Recorder::default()
        });
        let composer = composer(recorder.clone(), Duration::from_millis(10)).await;
        let sent = composer
            .send(
                "dev",
                "60123456789",
                Provider::Wablas,
                vec![ResponsePart::text("one"), ResponsePart::text("two")],
            )
            .await;
        assert_eq!(sent, 1);
        assert_eq!(recorder.messages().len(), 2);
    }

    #[tokio::test]
    async fn unknown_device_sends_nothing() {
        let recorder = Arc::new(Recorder::default());
        let composer = composer(recorder.clone(), Duration::ZERO).await;
        let sent = composer
            .send("other", "601", Provider::Wablas, vec![ResponsePart::text("x")])
            .await;
        assert_eq!(sent, 0);
        assert!(recorder.messages().is_empty());
    }
}

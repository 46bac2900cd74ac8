// Progress parsing, normalization and fan-out to subscribers.
use super::*;

pub(super) const PROGRESS_MARKER: &str = "siphon-progress|";
pub(super) const PROGRESS_TEMPLATE: &str = "download:siphon-progress|%(progress.downloaded_bytes)s|%(progress.total_bytes)s|%(progress.total_bytes_estimate)s|%(progress._percent_str)s";
const PROGRESS_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub percent: u8,
}

/// Clamps `raw_percent` into `[0, 100]` and never goes below `last_emitted`.
pub fn normalize(raw_percent: f64, last_emitted: u8) -> u8 {
    if raw_percent.is_nan() {
        return last_emitted;
    }
    let clamped = raw_percent.clamp(0.0, 100.0);
    if clamped <= f64::from(last_emitted) {
        return last_emitted;
    }
    clamped.round() as u8
}

pub trait ProgressParser: Send + Sync {
    fn parse(&self, line: &str) -> Option<f64>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct YtDlpProgressParser;

impl ProgressParser for YtDlpProgressParser {
    fn parse(&self, line: &str) -> Option<f64> {
        let line = line.trim();
        if let Some(stripped) = line.strip_prefix(PROGRESS_MARKER) {
            return parse_template_fields(stripped);
        }
        let rest = line.strip_prefix("[download]")?;
        let token = rest.split_whitespace().next()?;
        parse_percent_token(token)
    }
}

fn parse_template_fields(fields: &str) -> Option<f64> {
    let parts: Vec<&str> = fields.split('|').collect();
    let downloaded = parse_u64_field(parts.first().copied());
    let total = parse_u64_field(parts.get(1).copied());
    let total_estimate = parse_u64_field(parts.get(2).copied());
    let percent_hint = parts.get(3).and_then(|raw| parse_percent_token(raw));

    percent_from_bytes(downloaded, total, total_estimate).or(percent_hint)
}

pub(super) fn parse_u64_field(value: Option<&str>) -> Option<u64> {
    value.and_then(|raw| raw.trim().parse::<u64>().ok())
}

fn parse_percent_token(raw: &str) -> Option<f64> {
    let cleaned = raw.trim().replace(['%', ' '], "");
    cleaned.parse::<f64>().ok().filter(|value| value.is_finite())
}

pub(super) fn percent_from_bytes(
    downloaded: Option<u64>,
    total: Option<u64>,
    total_estimate: Option<u64>,
) -> Option<f64> {
    let downloaded = downloaded?;
    let baseline = total.or(total_estimate)?;
    if baseline == 0 {
        return None;
    }
    Some(downloaded as f64 / baseline as f64 * 100.0)
}

pub(super) async fn read_lossy_process_line<R>(
    reader: &mut R,
    raw_buffer: &mut Vec<u8>,
) -> Result<Option<String>, std::io::Error>
where
    R: AsyncBufRead + Unpin,
{
    raw_buffer.clear();
    let bytes_read = reader.read_until(b'\n', raw_buffer).await?;
    if bytes_read == 0 {
        return Ok(None);
    }
    while matches!(raw_buffer.last(), Some(b'\n' | b'\r')) {
        raw_buffer.pop();
    }
    Ok(Some(String::from_utf8_lossy(raw_buffer).to_string()))
}

/// Fans progress events out to any number of subscribers.
///
/// Late subscribers only see events sent after they subscribed; nothing is
/// replayed.
#[derive(Debug, Clone)]
pub struct ProgressHub {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(PROGRESS_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> ProgressSubscription {
        ProgressSubscription {
            receiver: self.sender.subscribe(),
        }
    }

    pub(super) fn emit(&self, percent: u8) {
        log::debug!("progress {percent}%");
        // No subscribers is fine.
        let _ = self.sender.send(ProgressEvent { percent });
    }
}

pub struct ProgressSubscription {
    receiver: broadcast::Receiver<ProgressEvent>,
}

impl ProgressSubscription {
    pub async fn next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::debug!("progress subscriber lagged, skipped {skipped} event(s)");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn try_next(&mut self) -> Option<ProgressEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_clamps_into_range() {
        assert_eq!(normalize(-12.0, 0), 0);
        assert_eq!(normalize(140.0, 20), 100);
        assert_eq!(normalize(42.4, 0), 42);
        assert_eq!(normalize(42.6, 0), 43);
    }

    #[test]
    fn normalize_never_goes_backwards() {
        assert_eq!(normalize(30.0, 55), 55);
        assert_eq!(normalize(55.0, 55), 55);
        assert_eq!(normalize(f64::NAN, 17), 17);
        assert_eq!(normalize(55.3, 55), 55);
    }

    #[test]
    fn normalized_sequence_is_monotonic_and_bounded() {
        let raw = [
            3.0, -5.0, 12.7, 12.2, 50.0, 49.9, 250.0, 80.0, f64::INFINITY, 100.0,
        ];
        let mut last = 0_u8;
        let mut seen = Vec::new();
        for value in raw {
            let next = normalize(value, last);
            assert!(next >= last);
            assert!(next <= 100);
            last = next;
            seen.push(next);
        }
        assert_eq!(seen, vec![3, 3, 13, 13, 50, 50, 100, 100, 100, 100]);
    }

    #[test]
    fn parses_template_lines_from_bytes_first() {
        let parser = YtDlpProgressParser;
        assert_eq!(parser.parse("siphon-progress|250|1000|NA|  9.0%"), Some(25.0));
        assert_eq!(parser.parse("siphon-progress|500|NA|2000| 1.0%"), Some(25.0));
        assert_eq!(parser.parse("siphon-progress|NA|NA|NA| 61.5%"), Some(61.5));
        assert_eq!(parser.parse("siphon-progress|NA|NA|NA|N/A"), None);
    }

    #[test]
    fn parses_default_download_lines() {
        let parser = YtDlpProgressParser;
        assert_eq!(
            parser.parse("[download]  45.2% of   12.30MiB at  1.20MiB/s ETA 00:05"),
            Some(45.2)
        );
        assert_eq!(parser.parse("[download] Destination: /tmp/video.temp.mp4"), None);
        assert_eq!(parser.parse("[ExtractAudio] Destination: video.temp.mp3"), None);
        assert_eq!(parser.parse(""), None);
    }

    #[tokio::test]
    async fn reads_lines_with_mixed_endings() {
        let data: &[u8] = b"first\r\nsecond\n\xff third";
        let mut reader = BufReader::new(data);
        let mut buffer = Vec::new();
        assert_eq!(
            read_lossy_process_line(&mut reader, &mut buffer).await.unwrap(),
            Some("first".to_string())
        );
        assert_eq!(
            read_lossy_process_line(&mut reader, &mut buffer).await.unwrap(),
            Some("second".to_string())
        );
        assert_eq!(
            read_lossy_process_line(&mut reader, &mut buffer).await.unwrap(),
            Some("\u{fffd} third".to_string())
        );
        assert_eq!(read_lossy_process_line(&mut reader, &mut buffer).await.unwrap(), None);
    }

    #[tokio::test]
    async fn late_subscribers_see_only_new_events() {
        let hub = ProgressHub::new();
        let mut early = hub.subscribe();
        hub.emit(0);
        let mut late = hub.subscribe();
        hub.emit(40);

        assert_eq!(early.next().await, Some(ProgressEvent { percent: 0 }));
        assert_eq!(early.next().await, Some(ProgressEvent { percent: 40 }));
        assert_eq!(late.next().await, Some(ProgressEvent { percent: 40 }));
        assert_eq!(late.try_next(), None);
    }

    #[tokio::test]
    async fn subscription_ends_when_hub_is_dropped() {
        let hub = ProgressHub::new();
        let mut subscription = hub.subscribe();
        drop(hub);
        assert_eq!(subscription.next().await, None);
    }
}

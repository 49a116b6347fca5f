use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local, Months, Utc};
use futures::stream::{self, Stream};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::FeedbackSettings;
use crate::error::{PushError, Result};
use crate::push::types::FeedbackRecord;

/// 4 字节时间戳 + 2 字节 token 长度 + 32 字节 token
pub const FEEDBACK_FRAME_LEN: usize = 4 + 2 + 32;
/// 工作缓冲区大小，正好容纳 39 帧
pub const FEEDBACK_BUFFER_LEN: usize = 1482;

/// 固定大小的帧缓冲区
///
/// 读入的数据追加到 `level` 之后；解帧从前往后消费，
/// 每轮读之前把残留的半帧搬回缓冲区开头。
pub struct FeedbackFrameBuffer {
    buf: [u8; FEEDBACK_BUFFER_LEN],
    index: usize,
    level: usize,
}

impl FeedbackFrameBuffer {
    pub fn new() -> Self {
        Self {
            buf: [0; FEEDBACK_BUFFER_LEN],
            index: 0,
            level: 0,
        }
    }

    /// 可写入的剩余空间
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.level..]
    }

    pub fn commit(&mut self, n: usize) {
        self.level = (self.level + n).min(FEEDBACK_BUFFER_LEN);
    }

    /// 取出下一个完整帧
    pub fn pop_frame(&mut self) -> Option<[u8; FEEDBACK_FRAME_LEN]> {
        if self.level - self.index < FEEDBACK_FRAME_LEN {
            return None;
        }

        let mut frame = [0u8; FEEDBACK_FRAME_LEN];
        frame.copy_from_slice(&self.buf[self.index..self.index + FEEDBACK_FRAME_LEN]);
        self.index += FEEDBACK_FRAME_LEN;
        Some(frame)
    }

    /// 把未消费的字节搬到开头
    pub fn compact(&mut self) {
        if self.index == 0 {
            return;
        }
        self.buf.copy_within(self.index..self.level, 0);
        self.level -= self.index;
        self.index = 0;
    }

    /// 尚未解帧的字节数
    pub fn pending(&self) -> usize {
        self.level - self.index
    }
}

impl Default for FeedbackFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// 解一帧；过期或不合法的记录返回 None
pub fn decode_frame(
    frame: &[u8; FEEDBACK_FRAME_LEN],
    feedback_time_is_utc: bool,
    min_timestamp: DateTime<Utc>,
) -> Option<FeedbackRecord> {
    let seconds = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]);
    let Some(timestamp) = DateTime::<Utc>::from_timestamp(i64::from(seconds), 0) else {
        warn!("[FEEDBACK] Invalid timestamp in frame: {}", seconds);
        return None;
    };

    let device_token = hex::encode(&frame[6..]);
    if device_token.len() != 64 {
        warn!("[FEEDBACK] Invalid device token length: {}", device_token.len());
        return None;
    }

    if timestamp <= min_timestamp {
        debug!("[FEEDBACK] Dropping stale record: token={}, timestamp={}", device_token, timestamp);
        return None;
    }

    let timestamp: DateTime<FixedOffset> = if feedback_time_is_utc {
        timestamp.fixed_offset()
    } else {
        timestamp.with_timezone(&Local).fixed_offset()
    };

    Some(FeedbackRecord {
        device_token,
        timestamp,
    })
}

/// 早于 `now - 1 年` 的记录视为垃圾数据
pub fn staleness_cutoff(now: DateTime<Utc>) -> DateTime<Utc> {
    now.checked_sub_months(Months::new(12)).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// 单次 Feedback 会话：在一条已建立的流上逐条产出记录
pub struct FeedbackSession<S> {
    stream: S,
    buffer: FeedbackFrameBuffer,
    feedback_time_is_utc: bool,
    min_timestamp: DateTime<Utc>,
    finished: bool,
}

impl<S: AsyncRead + Unpin> FeedbackSession<S> {
    pub fn new(stream: S, feedback_time_is_utc: bool) -> Self {
        Self::with_cutoff(stream, feedback_time_is_utc, staleness_cutoff(Utc::now()))
    }

    pub fn with_cutoff(stream: S, feedback_time_is_utc: bool, min_timestamp: DateTime<Utc>) -> Self {
        Self {
            stream,
            buffer: FeedbackFrameBuffer::new(),
            feedback_time_is_utc,
            min_timestamp,
            finished: false,
        }
    }

    /// 读取下一条记录
    ///
    /// 流结束或被取消时返回 `Ok(None)`。每次读之前、每解出一帧之后都会检查取消。
    pub async fn next_record(&mut self, cancel: &CancellationToken) -> Result<Option<FeedbackRecord>> {
        loop {
            if cancel.is_cancelled() {
                debug!("[FEEDBACK] Session cancelled");
                return Ok(None);
            }

            while let Some(frame) = self.buffer.pop_frame() {
                if let Some(record) = decode_frame(&frame, self.feedback_time_is_utc, self.min_timestamp) {
                    return Ok(Some(record));
                }
                if cancel.is_cancelled() {
                    return Ok(None);
                }
            }

            if self.finished {
                return Ok(None);
            }

            self.buffer.compact();

            let read = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("[FEEDBACK] Session cancelled while reading");
                    return Ok(None);
                }
                read = self.stream.read(self.buffer.spare_mut()) => read,
            };

            match read {
                Ok(0) => {
                    self.finished = true;
                    if self.buffer.pending() > 0 {
                        debug!("[FEEDBACK] Discarding {} trailing bytes", self.buffer.pending());
                    }
                    return Ok(None);
                }
                Ok(n) => self.buffer.commit(n),
                Err(e) if is_close_error(&e) => {
                    debug!("[FEEDBACK] Connection closed by peer: {}", e);
                    self.finished = true;
                    return Ok(None);
                }
                Err(e) => {
                    self.finished = true;
                    return Err(e.into());
                }
            }
        }
    }

    /// 转成有限流；遇到错误时产出一次 Err 后结束
    pub fn into_stream(self, cancel: CancellationToken) -> impl Stream<Item = Result<FeedbackRecord>> {
        stream::unfold(Some((self, cancel)), |state| async move {
            let (mut session, cancel) = state?;
            match session.next_record(&cancel).await {
                Ok(Some(record)) => Some((Ok(record), Some((session, cancel)))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> FeedbackSession<S> {
    /// 关闭连接，忽略关闭过程中的错误
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!("[FEEDBACK] Error while closing session: {}", e);
        }
    }
}

fn is_close_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
    )
}

/// APNs Feedback 服务客户端
pub struct FeedbackListener {
    settings: FeedbackSettings,
    connector: TlsConnector,
}

impl FeedbackListener {
    pub fn new(settings: FeedbackSettings) -> Result<Self> {
        let config = build_tls_config(&settings)?;
        Ok(Self {
            settings,
            connector: TlsConnector::from(Arc::new(config)),
        })
    }

    pub fn settings(&self) -> &FeedbackSettings {
        &self.settings
    }

    /// 建立 TLS 会话（客户端证书认证）
    pub async fn connect(&self) -> Result<FeedbackSession<TlsStream<TcpStream>>> {
        let host = self.settings.host.clone();
        let server_name = ServerName::try_from(host.clone())
            .map_err(|e| PushError::Configuration(format!("Invalid feedback host {}: {}", host, e)))?;

        let tcp = TcpStream::connect((host.as_str(), self.settings.port))
            .await
            .map_err(|e| PushError::Transport(format!("Failed to connect to {}:{}: {}", host, self.settings.port, e)))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| PushError::Tls(format!("TLS handshake with {} failed: {}", host, e)))?;

        debug!("[FEEDBACK] Connected to {}:{}", host, self.settings.port);
        Ok(FeedbackSession::new(tls, self.settings.feedback_time_is_utc))
    }

    /// 运行一次：连接、读到流结束或取消、关闭
    ///
    /// 会话建立失败时返回 Err；读过程中出错则记录日志并返回已收到的记录。
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<Vec<FeedbackRecord>> {
        let mut session = match self.connect().await {
            Ok(session) => session,
            Err(e) => {
                error!("[FEEDBACK] Failed to start feedback session: {}", e);
                return Err(e);
            }
        };

        let mut records = Vec::new();
        loop {
            match session.next_record(cancel).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => break,
                Err(e) => {
                    error!("[FEEDBACK] Feedback session aborted after {} records: {}", records.len(), e);
                    break;
                }
            }
        }
        session.close().await;

        info!("[FEEDBACK] Received {} expired device tokens", records.len());
        Ok(records)
    }

    /// 按配置的初始延迟和间隔反复运行，直到取消
    ///
    /// `interval_minutes == 0` 时只运行一次。
    pub async fn run_scheduled<F>(&self, cancel: CancellationToken, mut on_run: F)
    where
        F: FnMut(Result<Vec<FeedbackRecord>>),
    {
        let initial_delay = Duration::from_secs(self.settings.initial_delay_secs);
        let interval = Duration::from_secs(self.settings.interval_minutes * 60);

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(initial_delay) => {}
        }

        loop {
            on_run(self.run_once(&cancel).await);

            if interval.is_zero() {
                return;
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn build_tls_config(settings: &FeedbackSettings) -> Result<ClientConfig> {
    let mut roots = RootCertStore::empty();
    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!("[FEEDBACK] Loaded {} native root certificates ({} ignored)", added, ignored);
        }
        Err(e) => warn!("[FEEDBACK] Failed to load native root certificates: {}", e),
    }

    if let Some(ca_path) = &settings.ca_path {
        for cert in read_certs(ca_path)? {
            roots.add(cert)?;
        }
    }

    let certs = read_certs(&settings.certificate_path)?;
    let key = read_private_key(&settings.private_key_path)?;

    let config = ClientConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)?;

    Ok(config)
}

fn open_pem(path: &Path) -> Result<BufReader<File>> {
    let file = File::open(path)
        .map_err(|e| PushError::Configuration(format!("Failed to open {:?}: {}", path, e)))?;
    Ok(BufReader::new(file))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let mut reader = open_pem(path)?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<io::Result<Vec<_>>>()
        .map_err(|e| PushError::Configuration(format!("Failed to parse certificates in {:?}: {}", path, e)))?;

    if certs.is_empty() {
        return Err(PushError::Configuration(format!("No certificates found in {:?}", path)));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let mut reader = open_pem(path)?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| PushError::Configuration(format!("Failed to parse private key in {:?}: {}", path, e)))?
        .ok_or_else(|| PushError::Configuration(format!("No private key found in {:?}", path)))
}

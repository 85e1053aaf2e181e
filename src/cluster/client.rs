use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::Context as _;

use crate::cluster::protocol::{FrameRequest, read_response, write_request};
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::{Frame, FramePipeline};

/// Dispatches frame nodes to `timelapse worker` processes.
///
/// Each gather opens one connection per listed worker address; connections pull nodes from a
/// shared queue, so faster workers take more frames.
#[derive(Clone, Debug)]
pub struct ClusterClient {
    workers: Vec<String>,
}

impl ClusterClient {
    pub fn new(workers: Vec<String>) -> TimelapseResult<Self> {
        if workers.is_empty() {
            return Err(TimelapseError::conflicting(
                "cluster scheduler needs at least one worker address",
            ));
        }
        if let Some(bad) = workers.iter().find(|w| w.trim().is_empty()) {
            return Err(TimelapseError::conflicting(format!(
                "invalid worker address '{bad}'"
            )));
        }
        Ok(Self { workers })
    }

    pub fn workers(&self) -> &[String] {
        &self.workers
    }

    /// Workers reopen the source by path, so it must come from the filesystem.
    pub fn check(&self, pipeline: &FramePipeline) -> TimelapseResult<()> {
        source_path(pipeline).map(|_| ())
    }

    pub fn gather(
        &self,
        pipeline: &FramePipeline,
        times: &[usize],
        cancel: &AtomicBool,
        deliver: &(dyn Fn(usize, TimelapseResult<Frame>) + Sync),
    ) {
        let source = match source_path(pipeline) {
            Ok(path) => path,
            Err(e) => {
                for &t in times {
                    deliver(t, Err(TimelapseError::conflicting(e.detail())));
                }
                return;
            }
        };

        let queue = NodeQueue {
            times,
            next: AtomicUsize::new(0),
            done: times.iter().map(|_| AtomicBool::new(false)).collect(),
        };
        std::thread::scope(|scope| {
            for addr in &self.workers {
                let queue = &queue;
                scope.spawn(move || drive(addr, source, pipeline, queue, cancel, deliver));
            }
        });

        if cancel.load(Ordering::Relaxed) {
            return;
        }
        for (i, &time) in times.iter().enumerate() {
            if !queue.done[i].load(Ordering::Relaxed) {
                deliver(
                    time,
                    Err(TimelapseError::Other(anyhow::anyhow!(
                        "no cluster worker was reachable to compute time {time}"
                    ))),
                );
            }
        }
    }
}

struct NodeQueue<'a> {
    times: &'a [usize],
    next: AtomicUsize,
    done: Vec<AtomicBool>,
}

impl NodeQueue<'_> {
    fn take(&self) -> Option<(usize, usize)> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.times.get(i).map(|&t| (i, t))
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl Connection {
    fn open(addr: &str) -> TimelapseResult<Self> {
        let stream =
            TcpStream::connect(addr).with_context(|| format!("connect to worker '{addr}'"))?;
        stream.set_nodelay(true).context("configure worker socket")?;
        let reader = BufReader::new(stream.try_clone().context("clone worker socket")?);
        Ok(Self {
            reader,
            writer: BufWriter::new(stream),
        })
    }

    fn request(&mut self, req: &FrameRequest) -> TimelapseResult<TimelapseResult<Frame>> {
        write_request(&mut self.writer, req)?;
        read_response(&mut self.reader, req)
    }
}

fn drive(
    addr: &str,
    source: &Path,
    pipeline: &FramePipeline,
    queue: &NodeQueue<'_>,
    cancel: &AtomicBool,
    deliver: &(dyn Fn(usize, TimelapseResult<Frame>) + Sync),
) {
    let mut conn = match Connection::open(addr) {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(worker = addr, error = %e, "cluster worker unreachable");
            return;
        }
    };
    let stages = pipeline.stages();

    while !cancel.load(Ordering::Relaxed) {
        let Some((i, time)) = queue.take() else {
            return;
        };
        let req = FrameRequest {
            source: source.to_path_buf(),
            scene: pipeline.scene(),
            channel: pipeline.channel(),
            time,
            projection: stages.projection,
            normalization: stages.normalization,
            retries: stages.chunk_read_retries,
        };
        tracing::debug!(worker = addr, time, "frame dispatched");
        let (result, broken) = match conn.request(&req) {
            Ok(outcome) => (outcome, false),
            Err(transport) => (Err(transport), true),
        };
        queue.done[i].store(true, Ordering::Relaxed);
        deliver(time, result);
        if broken {
            tracing::warn!(worker = addr, "dropping cluster worker connection after failure");
            return;
        }
    }
}

fn source_path(pipeline: &FramePipeline) -> TimelapseResult<&Path> {
    pipeline.view().source().location().ok_or_else(|| {
        TimelapseError::conflicting(
            "cluster execution needs a file-backed source that workers can reopen",
        )
    })
}

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::path::PathBuf;

use anyhow::Context as _;

use crate::cluster::protocol::{FrameRequest, read_request, write_error, write_frame};
use crate::foundation::core::IndexRange;
use crate::foundation::error::{TimelapseError, TimelapseResult};
use crate::pipeline::frame::{Frame, FramePipeline};
use crate::reader;
use crate::reader::view::ArrayView;

/// Bind `addr` and serve frame requests until the process exits.
pub fn listen(addr: impl ToSocketAddrs) -> TimelapseResult<()> {
    let listener = TcpListener::bind(addr).context("bind worker socket")?;
    serve(listener)
}

/// Serve frame requests on `listener`, one thread per connection.
pub fn serve(listener: TcpListener) -> TimelapseResult<()> {
    let local = listener.local_addr().context("worker socket address")?;
    tracing::info!(%local, "worker listening");
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(error = %e, "failed to accept connection");
                continue;
            }
        };
        std::thread::spawn(move || {
            let peer = stream.peer_addr().ok();
            if let Err(e) = handle_connection(stream) {
                tracing::warn!(?peer, error = %e, "worker connection ended with an error");
            }
        });
    }
    Ok(())
}

/// Answer requests on one connection until the client hangs up.
///
/// Opened sources are cached for the connection's lifetime; every plane read still opens its
/// own file handle.
fn handle_connection(stream: TcpStream) -> TimelapseResult<()> {
    let peer: Option<SocketAddr> = stream.peer_addr().ok();
    tracing::debug!(?peer, "client connected");
    let mut reader = BufReader::new(stream.try_clone().context("clone client socket")?);
    let mut writer = BufWriter::new(stream);
    let mut views: HashMap<PathBuf, ArrayView> = HashMap::new();

    loop {
        let req = match read_request(&mut reader) {
            Ok(Some(req)) => req,
            Ok(None) => break,
            Err(e) => {
                // stream position is unknown after a bad message; answer once and hang up
                write_error(&mut writer, &TimelapseError::conflicting(e.detail()))?;
                break;
            }
        };
        match compute(&mut views, &req) {
            Ok(frame) => write_frame(&mut writer, &frame)?,
            Err(e) => {
                tracing::debug!(scene = req.scene, time = req.time, error = %e, "frame failed");
                write_error(&mut writer, &e)?;
            }
        }
    }
    tracing::debug!(?peer, "client disconnected");
    Ok(())
}

fn compute(views: &mut HashMap<PathBuf, ArrayView>, req: &FrameRequest) -> TimelapseResult<Frame> {
    let view = match views.entry(req.source.clone()) {
        Entry::Occupied(e) => e.into_mut(),
        Entry::Vacant(e) => e.insert(reader::open(&req.source)?),
    };
    let times = IndexRange::new(req.time, req.time + 1)?;
    let pipeline = FramePipeline::new(view, req.scene, req.channel, Some(times), req.stages())?;
    pipeline.compute(req.time)
}

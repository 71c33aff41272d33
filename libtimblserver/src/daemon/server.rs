// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    collections::BTreeMap,
    net::{TcpListener, TcpStream},
    sync::Arc,
    thread,
};

use anyhow::Context;
use tracing::{error, info, instrument};

use crate::engine::Experiment;

/// All the bases this server holds, keyed by name. Published before
/// the accept loop starts and never mutated after, so sessions read
/// it without locking.
pub type BaseMap = BTreeMap<String, Experiment>;

/// What a worker gets handed for one accepted connection. The worker
/// owns the socket for the connection's lifetime.
pub struct ConnArgs {
    pub stream: TcpStream,
    /// The accept counter value for this connection, also used as the
    /// session id.
    pub id: usize,
    pub debug: bool,
}

/// The capability every protocol front-end provides. One handler
/// instance serves all connections; per-connection state lives in the
/// `ConnArgs` and whatever the handler builds from them.
pub trait ProtocolHandler: Send + Sync {
    fn name(&self) -> &'static str;
    fn on_connection(&self, bases: &BaseMap, args: ConnArgs) -> anyhow::Result<()>;
}

pub struct Server {
    bases: Arc<BaseMap>,
    handler: Box<dyn ProtocolHandler>,
    maxconn: usize,
    debug: bool,
}

impl Server {
    pub fn new(
        bases: BaseMap,
        handler: Box<dyn ProtocolHandler>,
        maxconn: usize,
        debug: bool,
    ) -> Arc<Server> {
        Arc::new(Server { bases: Arc::new(bases), handler, maxconn, debug })
    }

    /// The accept loop. Each connection gets a worker thread; the
    /// slot channel holds accepts back once `maxconn` workers are
    /// busy.
    #[instrument(skip_all)]
    pub fn serve(server: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        info!(
            "serving the {} protocol with {} base(s), maxconn {}",
            server.handler.name(),
            server.bases.len(),
            server.maxconn
        );
        let (slot_tx, slot_rx) = crossbeam_channel::bounded::<()>(server.maxconn);
        let mut conn_counter = 0;
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    conn_counter += 1;
                    let conn_id = conn_counter;
                    slot_tx.send(()).context("acquiring connection slot")?;
                    let slot = SlotGuard(slot_rx.clone());
                    let server = Arc::clone(&server);
                    thread::spawn(move || {
                        let _slot = slot;
                        if let Err(err) = server.handle_conn(stream, conn_id) {
                            error!("handling new connection: {:?}", err);
                        }
                    });
                }
                Err(err) => {
                    error!("accepting stream: {:?}", err);
                }
            }
        }

        Ok(())
    }

    #[instrument(skip_all, fields(cid = conn_id))]
    fn handle_conn(&self, stream: TcpStream, conn_id: usize) -> anyhow::Result<()> {
        info!("socket got a new connection");
        self.handler.on_connection(
            &self.bases,
            ConnArgs { stream, id: conn_id, debug: self.debug },
        )
    }
}

// Returns its token to the slot pool when the worker finishes on any
// path, including panics.
struct SlotGuard(crossbeam_channel::Receiver<()>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let _ = self.0.try_recv();
    }
}

/// The single-default auto-bind rule: a map holding exactly one base
/// named `default` binds sessions without an explicit base command.
pub fn auto_bind(bases: &BaseMap) -> Option<&Experiment> {
    if bases.len() == 1 {
        bases.get("default")
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn auto_bind_wants_a_single_default() {
        use crate::engine::Algorithm;

        let mut bases = BaseMap::new();
        bases.insert(String::from("default"), Experiment::new(Algorithm::Ib1, "default"));
        assert!(auto_bind(&bases).is_some());

        let mut one_other = BaseMap::new();
        one_other.insert(String::from("b1"), Experiment::new(Algorithm::Ib1, "b1"));
        assert!(auto_bind(&one_other).is_none());

        bases.insert(String::from("b1"), Experiment::new(Algorithm::Ib1, "b1"));
        assert!(auto_bind(&bases).is_none());
    }
}

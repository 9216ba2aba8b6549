//! Helpers shared by the unit tests: a fixture tree and an in-memory [`RemoteStore`].

use crate::remote::{RemoteId, RemoteStore, StoreError};

pub async fn setup_test_dir() -> anyhow::Result<tempfile::TempDir> {
    // create a temporary directory
    let tmp_dir = tempfile::tempdir()?;
    // foo
    // |- 0.txt
    // |- bar
    //    |- 1.txt
    //    |- 2.txt
    //    |- 3.txt
    // |- baz
    //    |- 4.txt
    //    |- 5.txt
    //    |- qux
    //       |- 6.txt
    // |- empty
    let foo_path = tmp_dir.path().join("foo");
    tokio::fs::create_dir(&foo_path).await?;
    tokio::fs::write(foo_path.join("0.txt"), "0").await?;
    let bar_path = foo_path.join("bar");
    tokio::fs::create_dir(&bar_path).await?;
    tokio::fs::write(bar_path.join("1.txt"), "1").await?;
    tokio::fs::write(bar_path.join("2.txt"), "2").await?;
    tokio::fs::write(bar_path.join("3.txt"), "3").await?;
    let baz_path = foo_path.join("baz");
    tokio::fs::create_dir(&baz_path).await?;
    tokio::fs::write(baz_path.join("4.txt"), "4").await?;
    tokio::fs::write(baz_path.join("5.txt"), "5").await?;
    let qux_path = baz_path.join("qux");
    tokio::fs::create_dir(&qux_path).await?;
    tokio::fs::write(qux_path.join("6.txt"), "66").await?;
    tokio::fs::create_dir(foo_path.join("empty")).await?;
    Ok(tmp_dir)
}

/// Builds `root/{a/{x.jpg}, b/}`.
pub async fn setup_small_dir() -> anyhow::Result<tempfile::TempDir> {
    let tmp_dir = tempfile::tempdir()?;
    let root = tmp_dir.path().join("root");
    tokio::fs::create_dir(&root).await?;
    tokio::fs::create_dir(root.join("a")).await?;
    tokio::fs::write(root.join("a").join("x.jpg"), "jpeg").await?;
    tokio::fs::create_dir(root.join("b")).await?;
    Ok(tmp_dir)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CreateFolder {
        name: String,
        parent: Option<RemoteId>,
    },
    Upload {
        name: String,
        parent: RemoteId,
        local_path: std::path::PathBuf,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Started(Call),
    /// Folder creation returned this id
    Created(String, RemoteId),
    Uploaded(String),
    Failed(String),
}

#[derive(Default)]
struct StubState {
    events: Vec<Event>,
    /// Remaining injected failures per item name, `u32::MAX` fails forever
    failures: std::collections::HashMap<String, u32>,
    ids: std::collections::HashMap<String, RemoteId>,
    /// Ids that were handed out (a call using a parent id not in here is out of order)
    returned: std::collections::HashSet<RemoteId>,
    violations: Vec<String>,
    next_id: usize,
    malformed: std::collections::HashSet<String>,
}

/// In-memory [`RemoteStore`] recording every call, with programmable failures.
///
/// Items are addressed by name, so fixtures should use unique names.
#[derive(Default)]
pub struct StubStore {
    state: std::sync::Mutex<StubState>,
    delay: Option<std::time::Duration>,
}

impl StubStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep up to `delay` (randomized) inside every call to shake out orderings.
    #[must_use]
    pub fn with_delay(mut self, delay: std::time::Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    #[must_use]
    pub fn with_id(self, name: &str, id: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .ids
            .insert(name.to_string(), RemoteId::new(id));
        self
    }

    /// The first `count` calls for `name` fail.
    #[must_use]
    pub fn failing(self, name: &str, count: u32) -> Self {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(name.to_string(), count);
        self
    }

    #[must_use]
    pub fn always_failing(self, name: &str) -> Self {
        self.failing(name, u32::MAX)
    }

    /// Folder creation for `name` answers with an unparsable response once.
    #[must_use]
    pub fn malformed_once(self, name: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .malformed
            .insert(name.to_string());
        self
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                Event::Started(call) => Some(call),
                _ => None,
            })
            .collect()
    }

    /// Calls that used a parent id before that id was returned by the store.
    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    /// Id returned for the folder `name`, if it was created.
    pub fn id_of(&self, name: &str) -> Option<RemoteId> {
        self.events().into_iter().find_map(|event| match event {
            Event::Created(created, id) if created == name => Some(id),
            _ => None,
        })
    }

    fn start(&self, call: Call) -> Result<(), StoreError> {
        let mut state = self.state.lock().unwrap();
        let (name, parent) = match &call {
            Call::CreateFolder { name, parent } => (name.clone(), parent.clone()),
            Call::Upload { name, parent, .. } => (name.clone(), Some(parent.clone())),
        };
        if let Some(parent) = parent.filter(|parent| !state.returned.contains(parent)) {
            state
                .violations
                .push(format!("{name} dispatched with unknown parent {parent}"));
        }
        state.events.push(Event::Started(call));
        if let Some(remaining) = state
            .failures
            .get_mut(&name)
            .filter(|remaining| **remaining > 0)
        {
            if *remaining != u32::MAX {
                *remaining -= 1;
            }
            state.events.push(Event::Failed(name));
            return Err(StoreError::Failed {
                status: "exit status: 1".to_string(),
                stderr: "injected failure".to_string(),
            });
        }
        if state.malformed.remove(&name) {
            state.events.push(Event::Failed(name));
            return Err(StoreError::Malformed {
                output: "Error: try again".to_string(),
            });
        }
        Ok(())
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            let delay = crate::retry::backoff(delay / 2);
            tokio::time::sleep(delay).await;
        }
    }
}

impl RemoteStore for StubStore {
    async fn create_folder(
        &self,
        name: &std::ffi::OsStr,
        parent: Option<&RemoteId>,
    ) -> Result<RemoteId, StoreError> {
        let name = name.to_string_lossy().into_owned();
        self.start(Call::CreateFolder {
            name: name.clone(),
            parent: parent.cloned(),
        })?;
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        let id = match state.ids.get(&name) {
            Some(id) => id.clone(),
            None => {
                state.next_id += 1;
                RemoteId::new(format!("{}-{}", name, state.next_id))
            }
        };
        state.returned.insert(id.clone());
        state.events.push(Event::Created(name, id.clone()));
        Ok(id)
    }

    async fn upload_file(
        &self,
        name: &std::ffi::OsStr,
        parent: &RemoteId,
        local_path: &std::path::Path,
    ) -> Result<(), StoreError> {
        let name = name.to_string_lossy().into_owned();
        self.start(Call::Upload {
            name: name.clone(),
            parent: parent.clone(),
            local_path: local_path.to_path_buf(),
        })?;
        self.pause().await;
        self.state
            .lock()
            .unwrap()
            .events
            .push(Event::Uploaded(name));
        Ok(())
    }
}

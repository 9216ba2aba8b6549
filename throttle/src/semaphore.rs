/// Counting semaphore that can be switched off entirely (limit of 0).
#[derive(Debug)]
pub struct Semaphore {
    sem: Option<std::sync::Arc<tokio::sync::Semaphore>>,
    limit: usize,
}

impl Semaphore {
    pub fn new(value: usize) -> Self {
        Self {
            sem: (value > 0).then(|| std::sync::Arc::new(tokio::sync::Semaphore::new(value))),
            limit: value,
        }
    }

    pub fn in_use(&self) -> usize {
        self.sem
            .as_ref()
            .map_or(0, |sem| self.limit - sem.available_permits())
    }

    pub async fn acquire_owned(&self) -> Option<tokio::sync::OwnedSemaphorePermit> {
        let sem = self.sem.as_ref()?;
        // the semaphore is never closed so acquiring can only fail on a bug
        Some(
            sem.clone()
                .acquire_owned()
                .await
                .expect("throttle semaphore must never be closed"),
        )
    }
}

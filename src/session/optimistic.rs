use std::fmt::Display;
use std::future::Future;
use tracing::warn;

/// Local mutation applied before a remote call and undone if the call fails.
///
/// `apply` returns whatever `compensate` needs to restore the previous state.
pub struct OptimisticCommand<A, C> {
    name: &'static str,
    apply: A,
    compensate: C,
}

impl<A, C> OptimisticCommand<A, C> {
    pub fn new(name: &'static str, apply: A, compensate: C) -> Self {
        Self {
            name,
            apply,
            compensate,
        }
    }

    pub async fn run<S, U, F, T, E>(self, state: &mut S, dispatch: F) -> Result<T, E>
    where
        A: FnOnce(&mut S) -> U,
        C: FnOnce(&mut S, U),
        F: Future<Output = Result<T, E>>,
        E: Display,
    {
        let undo = (self.apply)(state);
        match dispatch.await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(command = self.name, error = %err, "Remote call failed, rolling back local change");
                (self.compensate)(state, undo);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_local_change_when_dispatch_succeeds() {
        let mut names = vec!["a".to_string(), "b".to_string()];

        let command = OptimisticCommand::new(
            "remove",
            |names: &mut Vec<String>| names.remove(0),
            |names: &mut Vec<String>, removed| names.insert(0, removed),
        );
        let result: Result<(), String> = command.run(&mut names, async { Ok(()) }).await;

        assert!(result.is_ok());
        assert_eq!(names, vec!["b".to_string()]);
    }

    #[tokio::test]
    async fn compensates_when_dispatch_fails() {
        let mut names = vec!["a".to_string(), "b".to_string()];

        let command = OptimisticCommand::new(
            "remove",
            |names: &mut Vec<String>| names.remove(0),
            |names: &mut Vec<String>, removed| names.insert(0, removed),
        );
        let result: Result<(), String> = command
            .run(&mut names, async { Err("offline".to_string()) })
            .await;

        assert_eq!(result, Err("offline".to_string()));
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }
}

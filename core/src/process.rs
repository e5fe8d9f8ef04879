// SQL Training
// Copyright 2023 Julio Merino
//
// Licensed under the Apache License, Version 2.0 (the "License"); you may not
// use this file except in compliance with the License.  You may obtain a copy
// of the License at:
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS, WITHOUT
// WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.  See the
// License for the specific language governing permissions and limitations
// under the License.

//! Identification of the running process.
//!
//! Connection pools must not be shared between a parent process and a child created via `fork`:
//! both would end up talking over the same sockets.  Components that own a pool compare the
//! process identifier they recorded at creation time against the current one to detect that
//! they are running in a child.

/// Generic source of the current process identifier.
pub trait ProcessIdentity {
    /// Returns the identifier of the process the caller is running in.
    fn id(&self) -> u32;
}

/// Process identity backed by the operating system.
#[derive(Clone, Default)]
pub struct SystemProcess {}

impl ProcessIdentity for SystemProcess {
    fn id(&self) -> u32 {
        std::process::id()
    }
}

/// Test utilities.
#[cfg(any(test, feature = "testutils"))]
pub mod testutils {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// A process identity that returns a preconfigured identifier and that can be modified at
    /// will to simulate a fork.
    pub struct SettableProcess {
        /// Current fake process identifier.
        id: AtomicU32,
    }

    impl SettableProcess {
        /// Creates a new identity that returns `id` until reconfigured.
        pub fn new(id: u32) -> Self {
            Self { id: AtomicU32::new(id) }
        }

        /// Sets the new identifier that the identity returns.
        pub fn set(&self, id: u32) {
            self.id.store(id, Ordering::SeqCst);
        }

        /// Simulates a fork by switching to a new identifier and returns it.
        pub fn fork(&self) -> u32 {
            self.id.fetch_add(1, Ordering::SeqCst) + 1
        }
    }

    impl ProcessIdentity for SettableProcess {
        fn id(&self) -> u32 {
            self.id.load(Ordering::SeqCst)
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_settableprocess_set_and_fork() {
            let process = SettableProcess::new(100);
            assert_eq!(100, process.id());

            process.set(200);
            assert_eq!(200, process.id());

            assert_eq!(201, process.fork());
            assert_eq!(201, process.id());
        }
    }
}

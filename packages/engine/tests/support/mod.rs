#![allow(dead_code)]

pub mod fixtures;
pub mod simulation;
pub mod sqlite_backend;

#[macro_export]
macro_rules! sqlite_test {
    ($name:ident, |$sim:ident| $body:expr) => {
        paste::paste! {
            #[test]
            fn [<$name _sqlite>]() {
                std::thread::Builder::new()
                    .name(concat!(stringify!($name), "_sqlite").to_string())
                    .stack_size(8 * 1024 * 1024)
                    .spawn(|| {
                        let runtime = tokio::runtime::Builder::new_current_thread()
                            .enable_all()
                            .build()
                            .expect("failed to build tokio runtime");
                        runtime.block_on(async {
                            $crate::support::simulation::run_sqlite_test(
                                concat!(module_path!(), "::", stringify!($name)),
                                |$sim| $body,
                            )
                            .await;
                        });
                    })
                    .expect("failed to spawn sqlite test thread")
                    .join()
                    .expect("sqlite test thread panicked");
            }
        }
    };
}

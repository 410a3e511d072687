//! Benchmarking client using the closed-loop driver.

use crate::drivers::{DriverClosedLoop, DriverReply};

use lazy_static::lazy_static;

use rand::distributions::Alphanumeric;
use rand::rngs::ThreadRng;
use rand::Rng;

use serde::Deserialize;

use tokio::time::{Duration, Instant};

use replikv::{logged_err, parsed_config, pf_error, pf_info, ReplikvError};

lazy_static! {
    /// Statistics printing interval.
    static ref PRINT_INTERVAL: Duration = Duration::from_millis(500);
}

/// Mode parameters struct.
#[derive(Debug, Deserialize)]
pub struct ModeParamsBench {
    /// Time length to benchmark in seconds.
    pub length_s: u64,

    /// Percentage of write requests.
    pub put_ratio: u8,

    /// Value size in bytes.
    pub value_size: usize,

    /// Number of distinct keys to choose from.
    pub num_keys: usize,
}

#[allow(clippy::derivable_impls)]
impl Default for ModeParamsBench {
    fn default() -> Self {
        ModeParamsBench {
            length_s: 30,
            put_ratio: 50,
            value_size: 128,
            num_keys: 5,
        }
    }
}

/// Benchmarking client struct.
pub struct ClientBench {
    /// Closed-loop request driver.
    driver: DriverClosedLoop,

    /// Mode parameters struct.
    params: ModeParamsBench,

    /// Random number generator.
    rng: ThreadRng,

    /// Pool of keys to choose from.
    keys_pool: Vec<String>,

    /// Fixed value generated according to specified size.
    value: Vec<u8>,
}

impl ClientBench {
    /// Creates a new benchmarking client.
    pub fn new(
        driver: DriverClosedLoop,
        params_str: Option<&str>,
    ) -> Result<Self, ReplikvError> {
        let params = parsed_config!(params_str => ModeParamsBench;
                                    length_s, put_ratio, value_size,
                                    num_keys)?;
        if params.length_s == 0 {
            return logged_err!("b"; "invalid params.length_s '{}'",
                                    params.length_s);
        }
        if params.put_ratio > 100 {
            return logged_err!("b"; "invalid params.put_ratio '{}'",
                                    params.put_ratio);
        }
        if params.value_size == 0 {
            return logged_err!("b"; "invalid params.value_size '{}'",
                                    params.value_size);
        }
        if params.num_keys == 0 {
            return logged_err!("b"; "invalid params.num_keys '{}'",
                                    params.num_keys);
        }

        let keys_pool = (0..params.num_keys)
            .map(|_| {
                rand::thread_rng()
                    .sample_iter(&Alphanumeric)
                    .take(8)
                    .map(char::from)
                    .collect()
            })
            .collect();
        let value = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(params.value_size)
            .collect();

        Ok(ClientBench {
            driver,
            params,
            rng: rand::thread_rng(),
            keys_pool,
            value,
        })
    }

    /// Issues one random operation and returns its reply.
    async fn do_rand_op(&mut self) -> Result<DriverReply, ReplikvError> {
        let key =
            self.keys_pool[self.rng.gen_range(0..self.keys_pool.len())].clone();
        if self.rng.gen_range(0..100) < self.params.put_ratio {
            self.driver.write(&key, self.value.clone()).await
        } else {
            self.driver.read(&key).await
        }
    }

    /// Runs the closed-loop benchmark and prints periodic statistics.
    pub async fn run(&mut self) -> Result<(), ReplikvError> {
        self.driver.connect().await?;

        let start = Instant::now();
        let length = Duration::from_secs(self.params.length_s);
        let mut last_print = start;

        let (mut ok_cnt, mut fail_cnt, mut total_ok) = (0u64, 0u64, 0u64);
        let mut chunk_lats: Vec<f64> = vec![];

        loop {
            let now = Instant::now();
            let elapsed = now.duration_since(start);
            if elapsed >= length {
                break;
            }

            match self.do_rand_op().await {
                Ok(DriverReply::Success { latency, .. }) => {
                    ok_cnt += 1;
                    total_ok += 1;
                    chunk_lats.push(latency.as_secs_f64() * 1000.0);
                }
                Ok(DriverReply::Failed) => {
                    fail_cnt += 1;
                }
                Err(e) => {
                    pf_error!("b"; "error issuing op: {}", e);
                    break;
                }
            }

            // print statistics roughly twice a second
            let print_elapsed = now.duration_since(last_print);
            if print_elapsed >= *PRINT_INTERVAL {
                let tput = ok_cnt as f64 / print_elapsed.as_secs_f64();
                let lat = if chunk_lats.is_empty() {
                    0.0
                } else {
                    chunk_lats.iter().sum::<f64>() / chunk_lats.len() as f64
                };
                pf_info!("b"; "elapsed {:.1} s | tput {:.1} ops/s | lat {:.3} ms | failed {}",
                              elapsed.as_secs_f64(), tput, lat, fail_cnt);
                ok_cnt = 0;
                chunk_lats.clear();
                last_print = now;
            }
        }

        let total_elapsed = Instant::now().duration_since(start);
        pf_info!("b"; "benchmark done: {} ok ops in {:.1} s ({:.1} ops/s), {} failed",
                      total_ok, total_elapsed.as_secs_f64(),
                      total_ok as f64 / total_elapsed.as_secs_f64(), fail_cnt);

        self.driver.leave().await?;
        Ok(())
    }
}

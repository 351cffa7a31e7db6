mod add;
mod eval;
mod search;
mod show;
mod train;

use std::sync::Arc;

use anyhow::Context;
pub use add::*;
pub use eval::*;
pub use search::*;
pub use show::*;
pub use train::*;

use crate::config::Opts;
use crate::vocabulary::Vocabulary;

pub trait SubCommandExtend {
    fn run(&self, opts: &Opts) -> impl std::future::Future<Output = anyhow::Result<()>> + Send;
}

fn load_vocabulary(opts: &Opts) -> anyhow::Result<Arc<Vocabulary>> {
    let path = opts.conf_dir.vocabulary();
    let vocabulary = Vocabulary::load(&path)
        .with_context(|| format!("无法加载词汇表 {}，请先运行 train", path.display()))?;
    Ok(Arc::new(vocabulary))
}

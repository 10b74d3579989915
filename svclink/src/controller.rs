use kube::Client;
use kube::config::KubeConfigOptions;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::ControllerArgs;

pub async fn start(
    args: ControllerArgs,
    ready: CancellationToken,
    cancel: CancellationToken,
) -> Result<()> {
    let client = match &args.kubeconfig_context {
        Some(context) => {
            let options = KubeConfigOptions {
                context: Some(context.clone()),
                ..Default::default()
            };
            Client::try_from(kube::Config::from_kubeconfig(&options).await?)?
        }
        None => Client::try_default().await?,
    };

    info!("starting svclink controller");
    svclink_controller::start_sync_loop(
        client,
        args.sync_config(),
        args.remote_timeout(),
        ready,
        cancel,
    )
    .await?;
    Ok(())
}

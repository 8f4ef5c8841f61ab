use tokio::time::timeout;
use tracing::{debug, warn};

use super::DiscoveryPolicy;
use crate::browser::BrowserPage;

/// Navigates to `target_url` and nudges the embedded player awake with a click.
///
/// Neither a failed navigation nor a failed click stops discovery: a partially
/// loaded page can still request its manifest.
pub async fn prepare<P>(page: &P, target_url: &str, policy: &DiscoveryPolicy)
where
    P: BrowserPage + ?Sized,
{
    match timeout(policy.navigation_timeout, page.navigate(target_url)).await {
        Ok(Ok(())) => debug!("Navigation to {target_url} committed"),
        Ok(Err(e)) => warn!("Navigation to {target_url} failed, proceeding anyway: {e:#}"),
        Err(_) => warn!(
            "Navigation to {target_url} did not commit within {:?}, proceeding anyway",
            policy.navigation_timeout
        ),
    }

    tokio::time::sleep(policy.settle_delay).await;

    let (x, y) = policy.click_point;
    match timeout(policy.navigation_timeout, page.click_at(x, y)).await {
        Ok(Ok(())) => debug!("Clicked at ({x}, {y})"),
        Ok(Err(e)) => warn!("Clicking failed, proceeding anyway: {e:#}"),
        Err(_) => warn!("Click did not complete, proceeding anyway"),
    }
}

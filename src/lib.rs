// This Source Code Form is subject to the terms of the GNU General Public
// License, version 3. If a copy of the GPL was not distributed with this file,
// You can obtain one at https://www.gnu.org/licenses/gpl.txt.
#[macro_use]
mod utility;
pub mod session;
pub mod subscriptions;
pub mod tree_server;

use std::fmt;

make_identifier!(ConnectionId);
make_identifier!(SubscriptionId);

pub mod sim_device;
